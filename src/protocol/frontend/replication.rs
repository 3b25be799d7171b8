//! Physical replication commands, sent as a CopyData-wrapped query text or
//! (for standby status updates) a CopyData-wrapped binary frame over an
//! already-started replication stream.

/// Build the `IDENTIFY_SYSTEM` query text.
pub fn identify_system() -> &'static str {
    "IDENTIFY_SYSTEM"
}

/// Build the `TIMELINE_HISTORY` query text for a given timeline ID.
pub fn timeline_history(timeline_id: u32) -> String {
    format!("TIMELINE_HISTORY {timeline_id}")
}

/// Build the `READ_REPLICATION_SLOT` query text for a named slot.
pub fn read_replication_slot(slot_name: &str) -> String {
    format!("READ_REPLICATION_SLOT {slot_name}")
}

/// Build the `START_REPLICATION` query text for physical replication starting
/// at `start_lsn` (`"X/Y"` form), optionally pinned to a timeline.
pub fn start_replication(slot_name: Option<&str>, start_lsn: &str, timeline: Option<u32>) -> String {
    let mut query = String::from("START_REPLICATION ");
    if let Some(slot) = slot_name {
        query.push_str("SLOT ");
        query.push_str(slot);
        query.push(' ');
    }
    query.push_str("PHYSICAL ");
    query.push_str(start_lsn);
    if let Some(tl) = timeline {
        query.push_str(&format!(" TIMELINE {tl}"));
    }
    query
}

/// Replication message type bytes sent on the CopyBoth stream after
/// `START_REPLICATION` has begun.
pub mod msg_type {
    /// XLogData ('w'): a chunk of WAL.
    pub const XLOG_DATA: u8 = b'w';
    /// Primary keepalive message ('k').
    pub const PRIMARY_KEEPALIVE: u8 = b'k';
    /// Standby status update ('r'), sent by the client.
    pub const STANDBY_STATUS_UPDATE: u8 = b'r';
}

/// Build a standby status update ('r') frame.
///
/// `written_lsn`/`flushed_lsn`/`applied_lsn` are absolute WAL positions;
/// `client_time` is microseconds since the PostgreSQL epoch (2000-01-01);
/// `reply_requested` asks the primary to send an immediate keepalive back.
pub fn write_standby_status_update(
    out: &mut Vec<u8>,
    written_lsn: u64,
    flushed_lsn: u64,
    applied_lsn: u64,
    client_time: i64,
    reply_requested: bool,
) {
    out.push(msg_type::STANDBY_STATUS_UPDATE);
    out.extend_from_slice(&written_lsn.to_be_bytes());
    out.extend_from_slice(&flushed_lsn.to_be_bytes());
    out.extend_from_slice(&applied_lsn.to_be_bytes());
    out.extend_from_slice(&client_time.to_be_bytes());
    out.push(reply_requested as u8);
}

/// Build a keepalive reply, identical wire shape to a standby status update
/// but conventionally sent only in response to a primary keepalive asking for one.
pub fn write_keepalive_reply(out: &mut Vec<u8>, lsn: u64, client_time: i64) {
    write_standby_status_update(out, lsn, lsn, lsn, client_time, false);
}

/// PostgreSQL epoch (2000-01-01 00:00:00 UTC) expressed as Unix seconds,
/// used to convert wall-clock time into the microsecond offsets replication
/// messages carry.
pub const PG_EPOCH_UNIX_SECONDS: i64 = 946_684_800;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_replication_includes_slot_and_timeline() {
        let query = start_replication(Some("slot1"), "0/1000000", Some(3));
        assert_eq!(query, "START_REPLICATION SLOT slot1 PHYSICAL 0/1000000 TIMELINE 3");
    }

    #[test]
    fn standby_status_update_is_34_bytes() {
        let mut buf = Vec::new();
        write_standby_status_update(&mut buf, 1, 2, 3, 4, true);
        assert_eq!(buf.len(), 1 + 8 * 3 + 8 + 1);
        assert_eq!(buf[0], msg_type::STANDBY_STATUS_UPDATE);
    }
}
