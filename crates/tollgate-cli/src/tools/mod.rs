use std::sync::Arc;
use tollgate_core::AppContext;

pub mod breakers;
pub mod decisions;
pub mod echo;

/// Register the tools every gateway process exposes.
pub fn register_builtin(ctx: &AppContext) {
    let registry = &ctx.tools;
    registry.register(Arc::new(echo::EchoTool));
    registry.register(Arc::new(decisions::DecisionsTool::new(Arc::clone(&ctx.tracer))));
    registry.register(Arc::new(breakers::BreakersTool::new(Arc::clone(&ctx.breakers))));
    registry.register(Arc::new(breakers::BreakerResetTool::new(Arc::clone(&ctx.breakers))));
}
