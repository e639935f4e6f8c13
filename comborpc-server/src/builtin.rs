//! Builtin system methods.

use crate::context::Context;
use crate::router::RouterBuilder;
use serde_json::json;

pub const PING: &str = "sys.ping";
pub const ECHO: &str = "sys.echo";
pub const INFO: &str = "sys.info";

/// Registers `sys.ping`, `sys.echo` and `sys.info`.
pub fn register(builder: RouterBuilder) -> RouterBuilder {
    builder
        .register(PING, handle_ping)
        .register(ECHO, handle_echo)
        .register(INFO, handle_info)
}

fn handle_ping(ctx: &mut Context) {
    ctx.write_string("pong");
}

fn handle_echo(ctx: &mut Context) {
    let input = ctx.input().to_vec();
    ctx.write(input);
}

fn handle_info(ctx: &mut Context) {
    let info = json!({
        "server_name": "comborpc",
        "server_version": env!("CARGO_PKG_VERSION"),
    });
    if let Err(e) = ctx.write_json(&info) {
        ctx.fail(e.to_string());
    }
}
