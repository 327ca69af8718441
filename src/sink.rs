use std::io::{self, Write};

use tracing::warn;

pub trait TextSink {
    fn emit(&mut self, fragment: &str);
}

impl<S: TextSink + ?Sized> TextSink for &mut S {
    fn emit(&mut self, fragment: &str) {
        (**self).emit(fragment);
    }
}

#[derive(Debug, Default)]
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn emit(&mut self, fragment: &str) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = stdout
            .write_all(fragment.as_bytes())
            .and_then(|()| stdout.flush())
        {
            warn!(error = %err, "failed to write streamed fragment to stdout");
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectingSink {
    pub fragments: Vec<String>,
}

impl CollectingSink {
    pub fn joined(&self) -> String {
        self.fragments.concat()
    }
}

impl TextSink for CollectingSink {
    fn emit(&mut self, fragment: &str) {
        self.fragments.push(fragment.to_string());
    }
}
