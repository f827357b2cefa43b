pub mod message;
pub mod writer;

pub use message::Message;
pub use writer::{JsonLinesWriter, MessageSink};
