//! Signal names accepted by the `kill` command.
use nix::sys::signal::Signal;

/// Parses a user-supplied signal name or number.
///
/// Accepts the short names with or without a `sig` prefix, in any case,
/// plus the usual numeric equivalents.
pub fn parse_signal(input: &str) -> Option<Signal> {
    let normalized = input.trim().to_ascii_lowercase();
    let name = normalized.strip_prefix("sig").unwrap_or(&normalized);

    match name {
        "1" | "hup" => Some(Signal::SIGHUP),
        "2" | "int" => Some(Signal::SIGINT),
        "3" | "quit" => Some(Signal::SIGQUIT),
        "9" | "kill" => Some(Signal::SIGKILL),
        "15" | "term" => Some(Signal::SIGTERM),
        "18" | "cont" => Some(Signal::SIGCONT),
        "19" | "stop" => Some(Signal::SIGSTOP),
        _ => None,
    }
}
