pub mod api;
pub mod compiler;
pub mod earley;
pub mod error;
pub mod grammar;
pub mod interrupt;
pub mod processor;
pub mod registry;
pub mod runtime;
pub mod scanner;
pub mod service;
pub mod sppt;
pub mod style;

mod logging;
pub use logging::Logger;

pub mod panic_utils;

pub use api::{LanguageIssue, ParseOptions, ParserLimits};
pub use compiler::compile_grammar_text;
pub use error::CompileError;
pub use processor::LanguageProcessor;
pub use registry::LanguageRegistry;
pub use service::{LanguageService, ServiceConfig};

#[macro_export]
macro_rules! loginfo {
    ($s:expr, $($arg:tt)*) => {
        if $s.level_enabled(2) {
            use std::fmt::Write;
            writeln!($s.info_logger(), $($arg)*).unwrap();
        }
    };
}

#[macro_export]
macro_rules! infoln {
    ($s:expr, $($arg:tt)*) => {
        if $s.logger.level_enabled(2) {
            use std::fmt::Write;
            writeln!($s.logger.info_logger(), $($arg)*).unwrap();
        }
    };
}

#[macro_export]
macro_rules! debugln {
    ($s:expr, $($arg:tt)*) => {
        if $s.logger.level_enabled(3) {
            use std::fmt::Write;
            writeln!($s.logger.debug_logger(), $($arg)*).unwrap();
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($s:expr, $($arg:tt)*) => {
        if $s.logger.level_enabled(1) {
            use std::fmt::Write;
            $s.logger.write_warning("Warning: ");
            writeln!($s.logger.warning_logger(), $($arg)*).unwrap();
        }
    };
}
