use std::fmt::Write;

/// Levels: 0 - silent, 1 - warnings, 2 - info, 3 - debug.
#[derive(Debug)]
pub struct Logger {
    effective_level: u32,
    buffer_level: u32,
    stderr_level: u32,
    buffer: String,
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Self {
            effective_level: self.effective_level,
            buffer_level: self.buffer_level,
            stderr_level: self.stderr_level,
            buffer: String::new(), // clean logs on clone
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new(0, 1)
    }
}

impl Logger {
    pub fn new(buffer_level: u32, stderr_level: u32) -> Self {
        Self {
            buffer_level,
            stderr_level,
            effective_level: std::cmp::max(buffer_level, stderr_level),
            buffer: String::new(),
        }
    }

    pub fn warn(&mut self, s: &str) {
        if self.level_enabled(1) {
            self.write_warning("Warning: ");
            self.write_warning(s);
            self.write_warning("\n");
        }
    }

    pub fn info(&mut self, s: &str) {
        if self.level_enabled(2) {
            self.write_line(2, s);
        }
    }

    pub fn debug(&mut self, s: &str) {
        if self.level_enabled(3) {
            self.write_line(3, s);
        }
    }

    fn write_line(&mut self, level: u32, s: &str) {
        self.write_at(level, s);
        self.write_at(level, "\n");
    }

    fn write_at(&mut self, level: u32, s: &str) {
        if level <= self.buffer_level {
            self.buffer.push_str(s);
        }
        if level <= self.stderr_level {
            eprint!("{}", s);
        }
    }

    pub fn write_warning(&mut self, s: &str) {
        self.write_at(1, s);
    }

    #[inline(always)]
    pub fn level_enabled(&self, level: u32) -> bool {
        level <= self.effective_level
    }

    #[inline(always)]
    pub fn effective_level(&self) -> u32 {
        self.effective_level
    }

    #[inline(always)]
    pub fn buffer_level(&self) -> u32 {
        self.buffer_level
    }

    #[inline(always)]
    pub fn stderr_level(&self) -> u32 {
        self.stderr_level
    }

    pub fn set_buffer_level(&mut self, buffer_level: u32) {
        self.buffer_level = buffer_level;
        self.effective_level = std::cmp::max(self.buffer_level, self.stderr_level);
    }

    pub fn set_stderr_level(&mut self, stderr_level: u32) {
        self.stderr_level = stderr_level;
        self.effective_level = std::cmp::max(self.buffer_level, self.stderr_level);
    }

    pub fn info_logger(&mut self) -> LevelWriter<'_> {
        LevelWriter {
            logger: self,
            level: 2,
        }
    }

    pub fn debug_logger(&mut self) -> LevelWriter<'_> {
        LevelWriter {
            logger: self,
            level: 3,
        }
    }

    pub fn warning_logger(&mut self) -> LevelWriter<'_> {
        LevelWriter {
            logger: self,
            level: 1,
        }
    }

    pub fn get_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn get_and_clear_logs(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

/// Writes into the logger at a fixed level; used by the logging macros.
pub struct LevelWriter<'a> {
    logger: &'a mut Logger,
    level: u32,
}

impl Write for LevelWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.logger.write_at(self.level, s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_respects_levels() {
        let mut logger = Logger::new(2, 0);
        logger.info("compiled");
        logger.debug("hidden");
        logger.warn("careful");
        let logs = logger.get_and_clear_logs();
        assert_eq!(logs, "compiled\nWarning: careful\n");
        assert!(logger.get_buffer().is_empty());
    }

    #[test]
    fn clone_drops_buffer() {
        let mut logger = Logger::new(3, 0);
        logger.debug("x");
        let copy = logger.clone();
        assert!(copy.get_buffer().is_empty());
        assert_eq!(copy.effective_level(), 3);
    }
}
