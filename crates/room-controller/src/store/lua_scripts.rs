//! Lua scripts for token-checked lock operations.
//!
//! Acquisition is a plain `SET key token NX PX ttl` (Redis expiry makes an
//! expired lock absent). Refresh and release must compare the stored token
//! and act in one atomic step, which needs a script:
//! - Read current owner token
//! - Compare with the presented token
//! - Only extend/delete on an exact match

/// Lua script for token-checked lock refresh.
///
/// Arguments:
/// - KEYS[1]: Lock key (e.g., `rc:lock:agent:{room}:{service}`)
/// - ARGV[1]: Owner token
/// - ARGV[2]: New TTL in milliseconds
///
/// Returns:
/// - 1: Refreshed
/// - 0: Not held by this token (absent, expired, or owned by someone else)
pub const REFRESH_LOCK: &str = r#"
local current = redis.call('GET', KEYS[1])

if current == false then
    -- Lock expired or was released
    return 0
end

if current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
else
    -- Owned by another holder, leave it alone
    return 0
end
"#;

/// Lua script for token-checked lock release.
///
/// Arguments:
/// - KEYS[1]: Lock key
/// - ARGV[1]: Owner token
///
/// Returns:
/// - 1: Released
/// - 0: Not held by this token
pub const RELEASE_LOCK: &str = r#"
local current = redis.call('GET', KEYS[1])

if current == false then
    -- Nothing to release
    return 0
end

if current == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
else
    -- Owned by another holder, leave it alone
    return 0
end
"#;
