//! Parsing of cluster redirection replies.
//!
//! During resharding a node answers with `-MOVED <slot> <host>:<port>`
//! (permanent: update the slot map and retry) or `-ASK <slot> <host>:<port>`
//! (one-shot: probe the target with ASKING, leave the map alone). Anything
//! that does not match the grammar exactly is not a redirection and the
//! original server error is surfaced unchanged.

/// A parsed redirection reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redirection {
    /// Permanent slot migration.
    Moved {
        /// Slot being redirected.
        slot: u16,
        /// New owner host.
        host: String,
        /// New owner port.
        port: u16,
    },
    /// One-shot redirect while a slot is migrating.
    Ask {
        /// Slot being redirected.
        slot: u16,
        /// Migration target host.
        host: String,
        /// Migration target port.
        port: u16,
    },
}

/// Parses a server error message as a redirection, if it is one.
///
/// Extra whitespace between tokens is tolerated. A missing colon, a
/// non-numeric slot, or a port outside `1..=65535` means "not a
/// redirection" and yields `None`.
pub(crate) fn parse_redirection(message: &str) -> Option<Redirection> {
    let mut tokens = message.split_whitespace();
    let kind = tokens.next()?;
    if kind != "MOVED" && kind != "ASK" {
        return None;
    }

    let slot: u16 = tokens.next()?.parse().ok()?;

    let addr = tokens.next()?;
    let colon = addr.find(':')?;
    let host = addr[..colon].to_string();
    let port: u32 = addr[colon + 1..].parse().ok()?;
    if port == 0 || port > 65535 {
        return None;
    }
    let port = port as u16;

    Some(if kind == "MOVED" {
        Redirection::Moved { slot, host, port }
    } else {
        Redirection::Ask { slot, host, port }
    })
}
