use std::io::Write;

use super::Message;
use crate::Result;

/// Destination for output messages, in emission order.
pub trait MessageSink {
    fn emit(&mut self, message: &Message) -> Result<()>;
}

/// Writes each message as one JSON line and flushes, so a consumer never
/// observes a partial checkpoint.
pub struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MessageSink for JsonLinesWriter<W> {
    fn emit(&mut self, message: &Message) -> Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<S: MessageSink + ?Sized> MessageSink for &mut S {
    fn emit(&mut self, message: &Message) -> Result<()> {
        (**self).emit(message)
    }
}

/// Collects messages in memory.
impl MessageSink for Vec<Message> {
    fn emit(&mut self, message: &Message) -> Result<()> {
        self.push(message.clone());
        Ok(())
    }
}
