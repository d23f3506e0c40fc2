use std::path::PathBuf;

/// Hands out one log path per accepted connection: `<base>.000`, `<base>.001`, ...
#[derive(Debug)]
pub struct LogFiles {
    base: PathBuf,
    next: u32,
}

impl LogFiles {
    pub fn new(base: PathBuf) -> Self {
        Self { base, next: 0 }
    }

    /// Reserve the next sequence number. Called in accept order.
    pub fn next_path(&mut self) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(format!(".{:03}", self.next));
        self.next += 1;
        name.into()
    }
}
