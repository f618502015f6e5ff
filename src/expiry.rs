//! Lazy expiry of activated programs.
//!
//! Nothing runs in the background: a record is expired the moment a reader observes
//! `now > expires_at`.

use crate::{constants::SECONDS_PER_DAY, state::program::ProgramInfo};

/// Deadline of a record activated at `activated_at`.
pub fn expiry_deadline(activated_at: u64, expiry_days: u16) -> u64 {
    activated_at.saturating_add(expiry_days as u64 * SECONDS_PER_DAY)
}

pub fn is_expired(program: &ProgramInfo, now: u64) -> bool {
    now > program.expires_at
}

/// Seconds since activation.
pub fn age(program: &ProgramInfo, now: u64) -> u64 {
    now.saturating_sub(program.activated_at)
}

/// Seconds until the record expires, zero once it has.
pub fn time_left(program: &ProgramInfo, now: u64) -> u64 {
    program.expires_at.saturating_sub(now)
}

/// Deadline after a keepalive at `now`. Never moves the current deadline backwards.
pub fn keepalive_deadline(program: &ProgramInfo, now: u64, keepalive_days: u16) -> u64 {
    program
        .expires_at
        .max(now.saturating_add(keepalive_days as u64 * SECONDS_PER_DAY))
}
