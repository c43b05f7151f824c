//! Cross-job message channels.
//!
//! A channel is a named rendezvous between a scripted job and host code.
//! Each direction has a one-slot buffer, so at most one value is outstanding
//! per direction; a host handler, when installed, consumes script posts
//! immediately in reactor context instead of parking them in the slot.

use crate::interpreter::errors::RuntimeError;
use crate::memory::value::Value;

/// Invoked in reactor thread context when the script side posts a value.
pub type ChannelHandler = Box<dyn FnMut(&Value) -> Result<(), RuntimeError>>;

pub struct Channel {
    /// script → host slot
    script_out: Option<Value>,
    /// host → script slot
    host_in: Option<Value>,
    handler: Option<ChannelHandler>,
    /// The owning job is blocked reading this channel.
    pub(crate) script_waiting: bool,
}

impl Channel {
    pub(crate) fn new() -> Channel {
        Channel { script_out: None, host_in: None, handler: None, script_waiting: false }
    }

    pub(crate) fn set_handler(&mut self, handler: Option<ChannelHandler>) {
        self.handler = handler;
    }

    /// Script-side post. Returns `false` when the outgoing slot is full and
    /// no handler is installed; the caller blocks the job and retries.
    pub(crate) fn post_from_script(&mut self, value: Value) -> Result<bool, RuntimeError> {
        if let Some(handler) = self.handler.as_mut() {
            handler(&value)?;
            return Ok(true);
        }
        if self.script_out.is_some() {
            return Ok(false);
        }
        self.script_out = Some(value);
        Ok(true)
    }

    /// Script-side read of the host → script slot.
    pub(crate) fn take_for_script(&mut self) -> Option<Value> {
        self.host_in.take()
    }

    /// Host-side post. A second post before the script reads is the
    /// host-integration error.
    pub(crate) fn post_from_host(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if self.host_in.is_some() {
            return Err(RuntimeError::ChannelBusy { name: name.to_string() });
        }
        self.host_in = Some(value);
        Ok(())
    }

    /// Host-side read of the script → host slot.
    pub(crate) fn take_for_host(&mut self) -> Option<Value> {
        self.script_out.take()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("script_out", &self.script_out)
            .field("host_in", &self.host_in)
            .field("handler", &self.handler.is_some())
            .field("script_waiting", &self.script_waiting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_host_send_is_an_error() {
        let mut ch = Channel::new();
        ch.post_from_host("m", Value::Int(1)).unwrap();
        assert!(matches!(
            ch.post_from_host("m", Value::Int(2)),
            Err(RuntimeError::ChannelBusy { .. })
        ));
        assert_eq!(ch.take_for_script().unwrap().to_int(), 1);
        ch.post_from_host("m", Value::Int(2)).unwrap();
    }

    #[test]
    fn handler_consumes_script_posts() {
        let mut ch = Channel::new();
        ch.set_handler(Some(Box::new(|v| {
            assert_eq!(v.to_int(), 7);
            Ok(())
        })));
        assert!(ch.post_from_script(Value::Int(7)).unwrap());
        assert!(ch.take_for_host().is_none());
    }

    #[test]
    fn script_post_parks_without_handler() {
        let mut ch = Channel::new();
        assert!(ch.post_from_script(Value::Int(1)).unwrap());
        // Slot full: the second post must wait.
        assert!(!ch.post_from_script(Value::Int(2)).unwrap());
        assert_eq!(ch.take_for_host().unwrap().to_int(), 1);
    }
}
