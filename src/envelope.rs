//! The `<data...> <command>` envelope shared by gossip datagrams and report
//! frames.
//!
//! The command is everything after the *last* space byte. The scan never
//! treats index 0 as the separator, so a payload whose only space is its
//! first byte is malformed. A trailing space yields an empty command, which
//! matches no known command.

const SEPARATOR: u8 = b' ';

/// Split a payload into `(data, command)`.
///
/// Returns `None` when no separator exists past the first byte.
pub fn split_command(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    let index = payload
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .find(|(_, byte)| **byte == SEPARATOR)
        .map(|(index, _)| index)?;

    Some((&payload[..index], &payload[index + 1..]))
}

/// Build a payload from data and a command name.
pub fn join_command(data: &[u8], command: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + command.len() + 1);
    payload.extend_from_slice(data);
    payload.push(SEPARATOR);
    payload.extend_from_slice(command.as_bytes());
    payload
}
