//! Command dispatch: turns one decoded packet payload into a reply payload
//! by driving a [`GdbTarget`].

use crate::target::{BreakpointKind, GdbTarget};

pub fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn stop_reply(target: &dyn GdbTarget) -> String {
    format!("T{:02x}thread:{:02x};", target.last_signal(), target.thread_id())
}

/// Handles one decoded packet payload. Returns `None` only for commands
/// that have no reply by protocol convention (`k`); every other command,
/// known or not, produces `Some` reply payload (possibly empty, meaning
/// "unsupported").
pub fn handle(target: &mut dyn GdbTarget, payload: &str) -> Option<String> {
    if payload.is_empty() {
        return Some(String::new());
    }
    let (tag, rest) = payload.split_at(1);
    match tag {
        "?" => Some(stop_reply(target)),
        "g" => Some(encode_hex(&target.read_registers())),
        "G" => match decode_hex(rest) {
            Some(data) => {
                target.write_registers(&data);
                Some("OK".to_string())
            }
            None => Some("E01".to_string()),
        },
        "p" => match usize::from_str_radix(rest, 16) {
            Ok(n) => match target.read_register(n) {
                Some(data) => Some(encode_hex(&data)),
                None => Some("E01".to_string()),
            },
            Err(_) => Some("E01".to_string()),
        },
        "P" => handle_write_register(target, rest),
        "m" => handle_read_memory(target, rest),
        "M" => handle_write_memory(target, rest),
        "c" => {
            let addr = parse_optional_addr(rest);
            target.cont(addr);
            Some(stop_reply(target))
        }
        "s" => {
            let addr = parse_optional_addr(rest);
            target.step(addr);
            Some(stop_reply(target))
        }
        "Z" => handle_breakpoint(target, rest, true),
        "z" => handle_breakpoint(target, rest, false),
        "k" => {
            target.kill();
            None
        }
        "D" => {
            target.detach();
            Some("OK".to_string())
        }
        "v" => handle_v_command(target, rest),
        "q" => handle_query(target, rest),
        _ => Some(String::new()),
    }
}

fn parse_optional_addr(rest: &str) -> Option<u64> {
    if rest.is_empty() {
        None
    } else {
        u64::from_str_radix(rest, 16).ok()
    }
}

fn handle_write_register(target: &mut dyn GdbTarget, rest: &str) -> Option<String> {
    let mut parts = rest.splitn(2, '=');
    let n = parts.next().and_then(|s| usize::from_str_radix(s, 16).ok());
    let data = parts.next().and_then(decode_hex);
    match (n, data) {
        (Some(n), Some(data)) => {
            if target.write_register(n, &data) {
                Some("OK".to_string())
            } else {
                Some("E01".to_string())
            }
        }
        _ => Some("E01".to_string()),
    }
}

fn handle_read_memory(target: &mut dyn GdbTarget, rest: &str) -> Option<String> {
    let mut parts = rest.splitn(2, ',');
    let addr = parts.next().and_then(|s| u64::from_str_radix(s, 16).ok());
    let len = parts.next().and_then(|s| usize::from_str_radix(s, 16).ok());
    match (addr, len) {
        (Some(addr), Some(len)) => Some(encode_hex(&target.read_memory(addr, len))),
        _ => Some("E01".to_string()),
    }
}

fn handle_write_memory(target: &mut dyn GdbTarget, rest: &str) -> Option<String> {
    let mut head_rest = rest.splitn(2, ':');
    let head = head_rest.next().unwrap_or_default();
    let data_hex = head_rest.next();
    let mut parts = head.splitn(2, ',');
    let addr = parts.next().and_then(|s| u64::from_str_radix(s, 16).ok());
    let len = parts.next().and_then(|s| usize::from_str_radix(s, 16).ok());
    match (addr, len, data_hex.and_then(decode_hex)) {
        (Some(addr), Some(len), Some(data)) if data.len() == len => {
            target.write_memory(addr, &data);
            Some("OK".to_string())
        }
        _ => Some("E01".to_string()),
    }
}

fn handle_breakpoint(target: &mut dyn GdbTarget, rest: &str, insert: bool) -> Option<String> {
    let mut parts = rest.splitn(3, ',');
    let kind = parts.next().and_then(|s| s.parse::<u8>().ok()).and_then(BreakpointKind::from_digit);
    let addr = parts.next().and_then(|s| u64::from_str_radix(s, 16).ok());
    let len = parts.next().and_then(|s| usize::from_str_radix(s, 16).ok());
    match (kind, addr, len) {
        (Some(kind), Some(addr), Some(len)) => {
            let ok = if insert {
                target.insert_breakpoint(kind, addr, len)
            } else {
                target.remove_breakpoint(kind, addr, len)
            };
            if ok {
                Some("OK".to_string())
            } else {
                Some("E01".to_string())
            }
        }
        _ => Some("E01".to_string()),
    }
}

fn handle_v_command(target: &mut dyn GdbTarget, rest: &str) -> Option<String> {
    if rest == "Cont?" {
        return Some("vCont;c;s".to_string());
    }
    if let Some(actions) = rest.strip_prefix("Cont;") {
        let first_action = actions.split(';').next().unwrap_or_default();
        let action_char = first_action.chars().next();
        match action_char {
            Some('c') => target.cont(None),
            Some('s') => target.step(None),
            _ => return Some(String::new()),
        }
        return Some(stop_reply(target));
    }
    Some(String::new())
}

fn handle_query(target: &mut dyn GdbTarget, rest: &str) -> Option<String> {
    match rest {
        "C" => Some(format!("QC{:x}", target.thread_id())),
        "fThreadInfo" => Some(format!("m{:x}", target.thread_id())),
        "sThreadInfo" => Some("l".to_string()),
        other if other.starts_with("ThreadExtraInfo,") => {
            Some(encode_hex(b"CPU0"))
        }
        _ => Some(String::new()),
    }
}
