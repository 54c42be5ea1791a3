use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

/// A callable tool exposed through `tools/list` and `tools/call`.
///
/// `call` runs on a blocking thread. An `Err` is reported to the client as
/// a result with `isError: true`, not as a protocol error.
pub trait GatewayTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    fn call(&self, args: Value) -> Result<Value, String>;
}

/// Runtime tool table. Registration order is listing order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<dyn GatewayTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any existing tool with the same name.
    pub fn register(&self, tool: Arc<dyn GatewayTool>) {
        let mut tools = self.tools.write().unwrap_or_else(|p| p.into_inner());
        match tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => tools[i] = tool,
            None => tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GatewayTool>> {
        let tools = self.tools.read().unwrap_or_else(|p| p.into_inner());
        tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `tools/list` entries.
    pub fn list(&self) -> Vec<Value> {
        let tools = self.tools.read().unwrap_or_else(|p| p.into_inner());
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.schema(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    impl GatewayTool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            self.1
        }
        fn schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn call(&self, _args: Value) -> Result<Value, String> {
            Ok(Value::String(self.1.to_string()))
        }
    }

    #[test]
    fn register_replaces_by_name_and_keeps_order() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(Named("a", "first")));
        reg.register(Arc::new(Named("b", "second")));
        reg.register(Arc::new(Named("a", "replaced")));

        assert_eq!(reg.len(), 2);
        let list = reg.list();
        assert_eq!(list[0]["name"], "a");
        assert_eq!(list[0]["description"], "replaced");
        assert_eq!(list[1]["inputSchema"]["type"], "object");
        assert_eq!(reg.get("a").unwrap().call(Value::Null).unwrap(), "replaced");
        assert!(reg.get("missing").is_none());
    }
}
