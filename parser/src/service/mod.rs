// Session layer: one ordered queue and worker thread per endpoint.
//
// Requests of one endpoint run strictly in submission order; endpoints are
// independent. `Interrupt` requests never queue: they bump the endpoint's
// epoch, and every request submitted under an older epoch sees itself
// interrupted the next time it polls.

pub mod codec;
pub mod messages;

use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::JoinHandle,
};

use anyhow::{anyhow, bail, Result};
use rustc_hash::FxHashMap;

use crate::{
    api::{
        EndPointIdentity, IssueCode, IssuePhase, LanguageIdentity, LanguageIssue, MessageStatus,
        ParserLimits,
    },
    interrupt::{Interrupt, InterruptToken},
    loginfo,
    panic_utils::{self, mk_panic_error},
    processor::{process, process_code_complete},
    registry::LanguageRegistry,
    style::StyleHandler,
    Logger,
};

use messages::{Request, Response, ResponseHeader};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    stderr_log_level: u32,
    buffer_log_level: u32,
    limits: ParserLimits,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            stderr_log_level: 1,
            buffer_log_level: 0,
            limits: ParserLimits::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits_mut(&mut self) -> &mut ParserLimits {
        &mut self.limits
    }

    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    pub fn quiet(&mut self) -> &mut Self {
        self.stderr_log_level = 0;
        self.buffer_log_level = 0;
        self
    }

    pub fn set_buffer_log_level(&mut self, level: u32) -> &mut Self {
        self.buffer_log_level = level;
        self
    }

    pub fn set_stderr_log_level(&mut self, level: u32) -> &mut Self {
        self.stderr_log_level = level;
        self
    }

    pub fn logger(&self) -> Logger {
        Logger::new(self.buffer_log_level, self.stderr_log_level)
    }
}

pub type Listener = Arc<dyn Fn(&Response) + Send + Sync>;

struct Job {
    request: Request,
    epoch: u64,
}

struct Worker {
    sender: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
    interrupt: InterruptToken,
}

struct Shared {
    registry: Arc<LanguageRegistry>,
    config: ServiceConfig,
    listeners: Mutex<FxHashMap<EndPointIdentity, Vec<Listener>>>,
    subscribers: Mutex<Vec<mpsc::Sender<Response>>>,
}

impl Shared {
    fn emit(&self, response: Response) {
        let listeners = self
            .listeners
            .lock()
            .unwrap()
            .get(&response.header().endpoint)
            .cloned()
            .unwrap_or_default();
        for l in listeners {
            // a failing listener must not take the endpoint's worker down
            if let Err(e) = std::panic::catch_unwind(AssertUnwindSafe(|| l(&response))) {
                self.config.logger().warn(&format!(
                    "listener for {} failed: {}",
                    response.header().endpoint,
                    mk_panic_error(&e)
                ));
            }
        }
        self.subscribers
            .lock()
            .unwrap()
            .retain(|s| s.send(response.clone()).is_ok());
    }

    fn not_found(
        &self,
        endpoint: &EndPointIdentity,
        language_id: &LanguageIdentity,
    ) -> ResponseHeader {
        let issue = LanguageIssue::error(
            IssuePhase::Protocol,
            IssueCode::Protocol,
            format!("no processor registered for {language_id}"),
        );
        ResponseHeader::new(endpoint, language_id, MessageStatus::Failure).with_issues(vec![issue])
    }

    fn handle(&self, request: Request, interrupt: &dyn Interrupt, logger: &mut Logger) {
        loginfo!(
            logger,
            "{}: {}",
            request.endpoint(),
            match &request {
                Request::ProcessorCreate { .. } => "ProcessorCreate",
                Request::ProcessorDelete { .. } => "ProcessorDelete",
                Request::SetStyle { .. } => "SetStyle",
                Request::Process { .. } => "Process",
                Request::Interrupt { .. } => "Interrupt",
                Request::CodeComplete { .. } => "CodeComplete",
            }
        );
        let emit = &mut |r: Response| self.emit(r);
        match request {
            Request::ProcessorCreate {
                endpoint,
                language_id,
                grammar,
                cross_reference,
            } => {
                let r = self.registry.create(
                    &language_id,
                    &grammar,
                    cross_reference.as_deref(),
                    self.config.logger(),
                    self.config.limits.clone(),
                );
                emit(match r {
                    Ok(p) => Response::ProcessorCreate {
                        header: ResponseHeader::new(&endpoint, &language_id, MessageStatus::Success),
                        scanner_matchables: p.scanner_matchables(),
                    },
                    Err(issue) => Response::ProcessorCreate {
                        header: ResponseHeader::new(&endpoint, &language_id, MessageStatus::Failure)
                            .with_issues(vec![issue]),
                        scanner_matchables: vec![],
                    },
                });
            }
            Request::ProcessorDelete {
                endpoint,
                language_id,
            } => {
                let header = if self.registry.dispose(&language_id) {
                    ResponseHeader::new(&endpoint, &language_id, MessageStatus::Success)
                } else {
                    self.not_found(&endpoint, &language_id)
                };
                emit(Response::ProcessorDelete { header });
            }
            Request::SetStyle {
                endpoint,
                language_id,
                style,
            } => emit(match StyleHandler::parse(&language_id, &style) {
                Ok(h) => {
                    let model = h.model().clone();
                    self.registry.set_style(&language_id, h);
                    Response::SetStyle {
                        header: ResponseHeader::new(&endpoint, &language_id, MessageStatus::Success),
                        style: Some(model),
                    }
                }
                Err(issue) => Response::SetStyle {
                    header: ResponseHeader::new(&endpoint, &language_id, MessageStatus::Failure)
                        .with_issues(vec![issue]),
                    style: None,
                },
            }),
            Request::Process {
                endpoint,
                language_id,
                text,
                options,
            } => match self.registry.lookup(&language_id) {
                Some(mut p) => {
                    let style = self.registry.style(&language_id);
                    process(
                        &mut p,
                        style.as_deref(),
                        &endpoint,
                        &text,
                        &options,
                        interrupt,
                        emit,
                    );
                }
                None => emit(Response::Parse {
                    header: self.not_found(&endpoint, &language_id),
                    tree: None,
                    stats: None,
                }),
            },
            Request::CodeComplete {
                endpoint,
                language_id,
                text,
                position,
                options,
            } => match self.registry.lookup(&language_id) {
                Some(mut p) => process_code_complete(
                    &mut p, &endpoint, &text, position, &options, interrupt, emit,
                ),
                None => emit(Response::CodeComplete {
                    header: self.not_found(&endpoint, &language_id),
                    items: vec![],
                }),
            },
            // handled by `LanguageService::submit` before queueing
            Request::Interrupt { .. } => {}
        }
    }
}

/// Runs requests against a [`LanguageRegistry`], one worker thread per
/// endpoint, and delivers responses to listeners and subscribers.
pub struct LanguageService {
    shared: Arc<Shared>,
    workers: Mutex<FxHashMap<EndPointIdentity, Worker>>,
    closed: AtomicBool,
}

impl LanguageService {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_registry(config, Arc::new(LanguageRegistry::new()))
    }

    pub fn with_registry(config: ServiceConfig, registry: Arc<LanguageRegistry>) -> Self {
        LanguageService {
            shared: Arc::new(Shared {
                registry,
                config,
                listeners: Mutex::new(FxHashMap::default()),
                subscribers: Mutex::new(vec![]),
            }),
            workers: Mutex::new(FxHashMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.shared.registry
    }

    /// Calls `listener` with every response addressed to `endpoint`, on
    /// the endpoint's worker thread.
    pub fn on_response<F>(&self, endpoint: &EndPointIdentity, listener: F)
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .entry(endpoint.clone())
            .or_default()
            .push(Arc::new(listener));
    }

    /// A channel receiving every response of every endpoint.
    pub fn subscribe(&self) -> mpsc::Receiver<Response> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn submit(&self, request: Request) -> Result<()> {
        self.submit_all(vec![request])
    }

    /// Enqueues `requests` in order. Epochs are assigned to the whole
    /// batch before any of it is sent, so an `Interrupt` inside the batch
    /// deterministically interrupts the batch's earlier requests of its
    /// endpoint, and nothing after it.
    pub fn submit_all(&self, requests: Vec<Request>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("language service is shut down");
        }
        let mut workers = self.workers.lock().unwrap();

        // endpoint -> (epoch for its next job, reason of the last interrupt)
        let mut epochs: FxHashMap<EndPointIdentity, (u64, Option<String>)> = FxHashMap::default();
        let mut jobs = vec![];
        for request in requests {
            let endpoint = request.endpoint().clone();
            if !workers.contains_key(&endpoint) {
                let w = self.spawn_worker(&endpoint)?;
                workers.insert(endpoint.clone(), w);
            }
            let token = &workers[&endpoint].interrupt;
            let (epoch, last_reason) = epochs
                .entry(endpoint.clone())
                .or_insert_with(|| (token.current_epoch(), None));
            match request {
                Request::Interrupt { reason, .. } => {
                    *epoch += 1;
                    *last_reason = Some(reason);
                }
                request => jobs.push((
                    endpoint,
                    Job {
                        request,
                        epoch: *epoch,
                    },
                )),
            }
        }
        for (endpoint, (epoch, reason)) in &epochs {
            if let Some(reason) = reason {
                workers[endpoint].interrupt.advance_to(*epoch, reason);
            }
        }
        for (endpoint, job) in jobs {
            workers[&endpoint]
                .sender
                .send(job)
                .map_err(|_| anyhow!("worker for {endpoint} has stopped"))?;
        }
        Ok(())
    }

    /// Interrupts whatever `endpoint` is running or has queued.
    pub fn interrupt(&self, endpoint: &EndPointIdentity, reason: &str) {
        if let Some(w) = self.workers.lock().unwrap().get(endpoint) {
            w.interrupt.interrupt(reason);
        }
    }

    /// Decodes and submits a JSON request. A request that does not decode
    /// is answered at once with a `Protocol` failure.
    pub fn submit_json(&self, json: &str) -> Result<()> {
        match codec::decode_request(json) {
            Ok(request) => self.submit(request),
            Err(failure) => {
                self.shared.emit(failure);
                Ok(())
            }
        }
    }

    fn spawn_worker(&self, endpoint: &EndPointIdentity) -> Result<Worker> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let interrupt = InterruptToken::new();
        let shared = Arc::clone(&self.shared);
        let token = interrupt.clone();
        let handle = std::thread::Builder::new()
            .name(format!("endpoint {endpoint}"))
            .spawn(move || {
                let mut logger = shared.config.logger();
                while let Ok(job) = receiver.recv() {
                    let observed = token.at_epoch(job.epoch);
                    let r = panic_utils::catch_unwind(AssertUnwindSafe(|| {
                        shared.handle(job.request, &observed, &mut logger);
                        Ok(())
                    }));
                    if let Err(e) = r {
                        logger.warn(&format!("request dropped: {e}"));
                    }
                }
            })?;
        Ok(Worker {
            sender,
            handle,
            interrupt,
        })
    }

    /// Closes every queue and waits for the workers to drain them.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let workers: Vec<Worker> = self
            .workers
            .lock()
            .unwrap()
            .drain()
            .map(|(_, w)| w)
            .collect();
        for w in workers {
            drop(w.sender);
            let _ = w.handle.join();
        }
    }
}

impl Drop for LanguageService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ContextSimple;
    use messages::ProcessOptions;
    use std::time::Duration;

    const GRAMMAR: &str = "namespace t grammar G {\n\
        skip leaf WS = \"\\s+\" ;\n\
        unit = stmt* ;\n\
        stmt = 'let' NAME ';' ;\n\
        leaf NAME = \"[a-z]+\" ;\n\
    }";

    fn lang() -> LanguageIdentity {
        LanguageIdentity::new("t")
    }

    fn service() -> (LanguageService, mpsc::Receiver<Response>) {
        let mut cfg = ServiceConfig::new();
        cfg.quiet();
        let svc = LanguageService::new(cfg);
        let rx = svc.subscribe();
        svc.submit(Request::ProcessorCreate {
            endpoint: EndPointIdentity::default(),
            language_id: lang(),
            grammar: GRAMMAR.to_string(),
            cross_reference: None,
        })
        .unwrap();
        let r = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(r.summary(), "ProcessorCreate:Success");
        (svc, rx)
    }

    fn process(endpoint: &EndPointIdentity, text: &str) -> Request {
        Request::Process {
            endpoint: endpoint.clone(),
            language_id: lang(),
            text: text.to_string(),
            options: ProcessOptions {
                semantic_analysis: false,
                ..Default::default()
            },
        }
    }

    fn collect(rx: &mpsc::Receiver<Response>, n: usize) -> Vec<Response> {
        (0..n)
            .map(|_| rx.recv_timeout(Duration::from_secs(10)).unwrap())
            .collect()
    }

    #[test]
    fn panicking_listener_keeps_worker_alive() {
        let (svc, rx) = service();
        let ep = EndPointIdentity::new("ed", "1");
        let calls = Arc::new(Mutex::new(0usize));
        svc.on_response(&ep, |_| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        svc.on_response(&ep, move |_| *counter.lock().unwrap() += 1);

        svc.submit(process(&ep, "let a;")).unwrap();
        let rs = collect(&rx, 4);
        assert_eq!(rs[3].summary(), "SyntaxAnalysis:Success");

        svc.submit(process(&ep, "let b;")).unwrap();
        let rs = collect(&rx, 4);
        assert_eq!(rs[1].summary(), "Parse:Success");
        assert_eq!(*calls.lock().unwrap(), 8);
    }

    #[test]
    fn create_returns_matchables() {
        let mut cfg = ServiceConfig::new();
        cfg.quiet();
        let svc = LanguageService::new(cfg);
        let rx = svc.subscribe();
        svc.submit_json(
            r#"{"action": "ProcessorCreate", "language_id": "t",
                "grammar": "namespace t grammar G { s = 'a' \"[0-9]+\" ; }"}"#,
        )
        .unwrap();
        match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
            Response::ProcessorCreate {
                header,
                scanner_matchables,
            } => {
                assert_eq!(header.status, MessageStatus::Success);
                assert!(scanner_matchables.contains(&"'a'".to_string()));
                assert!(scanner_matchables.contains(&"\"[0-9]+\"".to_string()));
            }
            r => panic!("unexpected {r:?}"),
        }
    }

    #[test]
    fn requests_of_one_endpoint_run_in_order() {
        let (svc, rx) = service();
        let ep = EndPointIdentity::new("ed", "1");
        svc.submit(process(&ep, "let a;")).unwrap();
        svc.submit(process(&ep, "let")).unwrap();
        let rs = collect(&rx, 6);
        let s: Vec<_> = rs.iter().map(|r| r.summary()).collect();
        assert_eq!(
            s,
            vec![
                "Parse:Start",
                "Parse:Success",
                "SyntaxAnalysis:Start",
                "SyntaxAnalysis:Success",
                "Parse:Start",
                "Parse:Failure",
            ]
        );
        assert!(rs.iter().all(|r| r.header().endpoint == ep));
    }

    #[test]
    fn interrupt_in_batch_is_deterministic() {
        let (svc, rx) = service();
        let ep = EndPointIdentity::new("ed", "2");
        svc.submit_all(vec![
            process(&ep, "let a;"),
            Request::Interrupt {
                endpoint: ep.clone(),
                reason: "keystroke".to_string(),
            },
            process(&ep, "let b;"),
        ])
        .unwrap();
        let rs = collect(&rx, 5);
        assert_eq!(rs[0].summary(), "Parse:Failure");
        let issue = &rs[0].header().issues[0];
        assert_eq!(issue.code, IssueCode::Interrupted);
        assert!(issue.message.contains("keystroke"));
        assert_eq!(rs[1].summary(), "Parse:Start");
        assert_eq!(rs[4].summary(), "SyntaxAnalysis:Success");
    }

    #[test]
    fn unknown_language_and_bad_json() {
        let (svc, rx) = service();
        let ep = EndPointIdentity::new("ed", "3");
        svc.submit(Request::Process {
            endpoint: ep.clone(),
            language_id: LanguageIdentity::new("missing"),
            text: String::new(),
            options: ProcessOptions {
                context: Some(ContextSimple::default()),
                ..Default::default()
            },
        })
        .unwrap();
        let r = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(r.summary(), "Parse:Failure");
        assert_eq!(r.header().issues[0].code, IssueCode::Protocol);

        svc.submit_json("[1, 2").unwrap();
        let r = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(r.summary(), "Protocol:Failure");
    }

    #[test]
    fn listeners_and_shutdown() {
        let (svc, _rx) = service();
        let ep = EndPointIdentity::new("ed", "4");
        let seen = Arc::new(Mutex::new(vec![]));
        let seen2 = Arc::clone(&seen);
        svc.on_response(&ep, move |r| seen2.lock().unwrap().push(r.summary()));
        svc.submit(process(&ep, "let a;")).unwrap();
        svc.shutdown();
        assert_eq!(seen.lock().unwrap().len(), 4);
        assert!(svc.submit(process(&ep, "let a;")).is_err());
    }
}
