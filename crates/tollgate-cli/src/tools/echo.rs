use tollgate_core::tools::GatewayTool;

pub struct EchoTool;

impl GatewayTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the arguments unchanged; useful for probing admission decisions"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "additionalProperties": true
        })
    }

    fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_arguments() {
        let args = serde_json::json!({"text": "hello", "n": 3});
        assert_eq!(EchoTool.call(args.clone()).unwrap(), args);
    }
}
