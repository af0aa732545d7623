//! Argument collection
//!
//! Turns the process arguments into the source text of a single `boot` call.

use crate::protocol::Request;

/// Rendered argument list used when no arguments are given
pub const DEFAULT_ARGS: &str = "\"help\"";

/// Render each argument as a string literal preceded by a space
///
/// JSON string escaping is also valid Clojure string syntax for quotes,
/// backslashes and control characters. An empty list renders as `"help"`.
pub fn render_args<S: AsRef<str>>(args: &[S]) -> String {
    if args.is_empty() {
        return DEFAULT_ARGS.to_string();
    }

    let mut rendered = String::new();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&serde_json::Value::from(arg.as_ref()).to_string());
    }
    rendered
}

/// Source text of the boot invocation; the result is discarded with `nil`
pub fn boot_code<S: AsRef<str>>(args: &[S]) -> String {
    format!("(boot {}) nil", render_args(args).trim_start())
}

/// The eval request relaying `args` to boot
pub fn eval_request<S: AsRef<str>>(args: &[S]) -> Request {
    Request::eval(boot_code(args))
}
