use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::{
    api::{LanguageIdentity, LanguageIssue, ParserLimits},
    loginfo,
    processor::LanguageProcessor,
    style::StyleHandler,
    Logger,
};

/// Compiled languages and their styles, owned by the hosting application.
///
/// Processors are stored as prototypes; [`LanguageRegistry::lookup`] hands
/// out clones, which share the compiled rule set but own their logger and
/// statistics.
#[derive(Default)]
pub struct LanguageRegistry {
    processors: RwLock<FxHashMap<LanguageIdentity, LanguageProcessor>>,
    styles: RwLock<FxHashMap<LanguageIdentity, Arc<StyleHandler>>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `grammar` and registers it under `language_id`, replacing
    /// any previous processor. On failure nothing stays registered for
    /// that identity.
    pub fn create(
        &self,
        language_id: &LanguageIdentity,
        grammar: &str,
        cross_reference: Option<&str>,
        mut logger: Logger,
        limits: ParserLimits,
    ) -> Result<LanguageProcessor, LanguageIssue> {
        let r = LanguageProcessor::from_grammar(
            language_id.clone(),
            grammar,
            cross_reference,
            logger.clone(),
            limits,
        );
        match r {
            Ok(p) => {
                self.register(p.clone());
                Ok(p)
            }
            Err(issue) => {
                self.remove(language_id);
                loginfo!(logger, "create {} failed: {}", language_id, issue.message);
                Err(issue)
            }
        }
    }

    pub fn register(&self, processor: LanguageProcessor) {
        let id = processor.identity().clone();
        self.processors.write().unwrap().insert(id, processor);
    }

    /// A fresh copy of the registered processor.
    pub fn lookup(&self, language_id: &LanguageIdentity) -> Option<LanguageProcessor> {
        self.processors.read().unwrap().get(language_id).cloned()
    }

    pub fn contains(&self, language_id: &LanguageIdentity) -> bool {
        self.processors.read().unwrap().contains_key(language_id)
    }

    /// Drops the processor and its style; returns whether a processor was
    /// registered.
    pub fn dispose(&self, language_id: &LanguageIdentity) -> bool {
        self.styles.write().unwrap().remove(language_id);
        self.remove(language_id)
    }

    fn remove(&self, language_id: &LanguageIdentity) -> bool {
        self.processors
            .write()
            .unwrap()
            .remove(language_id)
            .is_some()
    }

    pub fn set_style(&self, language_id: &LanguageIdentity, style: StyleHandler) -> Arc<StyleHandler> {
        let style = Arc::new(style);
        self.styles
            .write()
            .unwrap()
            .insert(language_id.clone(), Arc::clone(&style));
        style
    }

    pub fn style(&self, language_id: &LanguageIdentity) -> Option<Arc<StyleHandler>> {
        self.styles.read().unwrap().get(language_id).cloned()
    }

    pub fn language_ids(&self) -> Vec<LanguageIdentity> {
        let mut ids: Vec<_> = self.processors.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::IssueCode;

    const GRAMMAR: &str = "namespace t grammar G { s = 'a' ; }";

    #[test]
    fn lifecycle() {
        let reg = LanguageRegistry::new();
        let id = LanguageIdentity::new("t");
        reg.create(&id, GRAMMAR, None, Logger::default(), ParserLimits::default())
            .unwrap();
        assert!(reg.contains(&id));
        reg.set_style(&id, StyleHandler::parse(&id, "'a' { color: red; }").unwrap());
        assert!(reg.style(&id).is_some());

        let p1 = reg.lookup(&id).unwrap();
        let p2 = reg.lookup(&id).unwrap();
        assert!(Arc::ptr_eq(p1.rules(), p2.rules()));

        assert!(reg.dispose(&id));
        assert!(reg.lookup(&id).is_none());
        assert!(reg.style(&id).is_none());
        assert!(!reg.dispose(&id));
    }

    #[test]
    fn failed_create_removes_previous() {
        let reg = LanguageRegistry::new();
        let id = LanguageIdentity::new("t");
        reg.create(&id, GRAMMAR, None, Logger::default(), ParserLimits::default())
            .unwrap();
        let issue = reg
            .create(&id, "namespace t grammar G { s = x ; }", None, Logger::default(), ParserLimits::default())
            .unwrap_err();
        assert_eq!(issue.code, IssueCode::UnresolvedReference);
        assert!(!reg.contains(&id));
        assert!(reg.language_ids().is_empty());
    }
}
