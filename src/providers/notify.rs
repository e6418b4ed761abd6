//! notify - log a message on every run

use anyhow::Result;
use catalog::{Resource, Value};
use provider::{Provider, State};

/// Never in sync, so the message shows up as a change each run
pub struct NotifyDefault;

impl Provider for NotifyDefault {
    fn retrieve(&self, _resource: &Resource) -> Result<State> {
        Ok(State::from([("message".to_string(), Value::Undef)]))
    }

    fn sync(&self, resource: &Resource, _property: &str, desired: &Value) -> Result<()> {
        if resource.get("withpath").is_some_and(Value::is_truthy) {
            log::info!("{}: {desired}", resource.reference);
        } else {
            log::info!("{desired}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_never_in_sync() {
        let resource = Resource::new("notify", "hello");
        let state = NotifyDefault.retrieve(&resource).unwrap();
        assert!(!NotifyDefault.insync("message", &state["message"], &Value::from("hello")));
        assert!(NotifyDefault.sync(&resource, "message", &Value::from("hello")).is_ok());
    }
}
