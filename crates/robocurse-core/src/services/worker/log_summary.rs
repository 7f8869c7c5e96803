use std::sync::LazyLock;

use regex::Regex;

use crate::models::progress::{CopyTally, TallyRow};

// Final statistics block at the tail of a worker's log:
//
//                Total    Copied   Skipped  Mismatch    FAILED    Extras
//     Dirs :        81        27        54         0         0         0
//    Files :       722       722         0         0         0         0
//    Bytes :  14510329  14510329         0         0         0         0
//
//    Speed :             7255164 Bytes/sec.
static TALLY_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(Dirs|Files|Bytes)\s*:\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s*$")
        .expect("invalid tally row regex")
});

static SPEED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Speed\s*:\s+(\d+)\s+Bytes/sec").expect("invalid speed regex")
});

/// Parse the authoritative end-of-job totals from the worker's log text.
/// Returns `None` when no stats block is present (killed worker, truncated
/// log); the caller falls back to streamed estimates.
pub fn parse_log_summary(log_text: &str) -> Option<CopyTally> {
    let mut dirs: Option<TallyRow> = None;
    let mut files: Option<TallyRow> = None;
    let mut bytes: Option<TallyRow> = None;
    let mut speed: Option<u64> = None;

    // The block sits at the end; scan in reverse so a stray mid-log line
    // matching the shape cannot shadow the real totals.
    for line in log_text.lines().rev() {
        if let Some(caps) = TALLY_ROW_RE.captures(line) {
            let row = TallyRow {
                total: caps[2].parse().ok()?,
                copied: caps[3].parse().ok()?,
                skipped: caps[4].parse().ok()?,
                mismatched: caps[5].parse().ok()?,
                failed: caps[6].parse().ok()?,
                extras: caps[7].parse().ok()?,
            };
            match &caps[1] {
                "Dirs" => dirs.get_or_insert(row),
                "Files" => files.get_or_insert(row),
                "Bytes" => bytes.get_or_insert(row),
                _ => unreachable!("regex restricts row names"),
            };
        } else if let Some(caps) = SPEED_RE.captures(line) {
            if speed.is_none() {
                speed = caps[1].parse().ok();
            }
        }

        if dirs.is_some() && files.is_some() && bytes.is_some() {
            break;
        }
    }

    Some(CopyTally {
        dirs: dirs?,
        files: files?,
        bytes: bytes?,
        speed_bytes_per_sec: speed,
    })
}
