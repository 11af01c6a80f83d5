//! Throttle state shared through Redis.
//!
//! Each operation is a single Lua script so that concurrent processes see
//! the same atomic check-then-act the local backend gets from its mutex.
//! Scripts read the clock with `TIME`, so every process is judged against
//! the server's clock rather than its own.

use std::time::Duration;

use async_trait::async_trait;
use mailprobe_common::{CoordConfig, HostKey, ThrottleLimits};
use redis::Script;

use super::{
    AcquireDecision, BlockReason, HostThrottleSnapshot, ThrottleStore, state::LIMIT_POLL,
};
use crate::{error::StoreError, store::RedisStore};

const NOW_MS: &str = r"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
";

const CLAMP_MAX: &str = r"
local function clamp_max(value, ceiling)
    local max = tonumber(value) or ceiling
    if max > ceiling then max = ceiling end
    if max < 1 then max = 1 end
    return max
end
";

// KEYS: host, global
// ARGV: ceiling, min_interval_ms, global_max, ttl_secs, poll_ms
const ACQUIRE: &str = r"
local ceiling = tonumber(ARGV[1])
local interval = tonumber(ARGV[2])
local global_max = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local poll = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'in_flight', 'adaptive_max', 'penalty_until', 'last_attempt')
local in_flight = tonumber(state[1]) or 0
local max = clamp_max(state[2], ceiling)
local penalty_until = tonumber(state[3]) or 0
local last = tonumber(state[4])
local global = tonumber(redis.call('GET', KEYS[2])) or 0

if penalty_until > now then
    return {'penalty', global, in_flight, max, penalty_until - now}
end
if last and last + interval > now then
    return {'min_interval', global, in_flight, max, last + interval - now}
end
if global >= global_max then
    return {'global_limit', global, in_flight, max, poll}
end
if in_flight >= max then
    return {'host_limit', global, in_flight, max, poll}
end

in_flight = redis.call('HINCRBY', KEYS[1], 'in_flight', 1)
redis.call('HINCRBY', KEYS[1], 'acquired', 1)
redis.call('HSET', KEYS[1], 'adaptive_max', max, 'last_attempt', now)
redis.call('EXPIRE', KEYS[1], ttl)
global = redis.call('INCR', KEYS[2])
redis.call('EXPIRE', KEYS[2], ttl)

return {'', global, in_flight, max, 0}
";

// KEYS: host, global
const RELEASE: &str = r"
local in_flight = tonumber(redis.call('HGET', KEYS[1], 'in_flight')) or 0
if in_flight <= 0 then
    return 0
end

redis.call('HINCRBY', KEYS[1], 'in_flight', -1)
local global = tonumber(redis.call('GET', KEYS[2])) or 0
if global > 0 then
    redis.call('DECR', KEYS[2])
end

return 1
";

// KEYS: host
// ARGV: ceiling, success_threshold, ttl_secs
const SUCCESS: &str = r"
local ceiling = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])

local state = redis.call('HMGET', KEYS[1], 'adaptive_max', 'consecutive_failures', 'consecutive_successes')
local max = clamp_max(state[1], ceiling)
local failures = tonumber(state[2]) or 0
local successes = (tonumber(state[3]) or 0) + 1

if failures > 0 then failures = failures - 1 end
if successes >= threshold then
    max = math.min(max + 1, ceiling)
    successes = 0
end

redis.call('HSET', KEYS[1], 'adaptive_max', max, 'consecutive_failures', failures, 'consecutive_successes', successes)
redis.call('HINCRBY', KEYS[1], 'successes', 1)
redis.call('EXPIRE', KEYS[1], ttl)

return max
";

// KEYS: host
// ARGV: ceiling, failure_threshold, severe, penalty_base_ms, penalty_cap_ms, ttl_secs
const FAILURE: &str = r"
local ceiling = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local severe = tonumber(ARGV[3]) == 1
local base = tonumber(ARGV[4])
local cap = tonumber(ARGV[5])
local ttl = tonumber(ARGV[6])

local state = redis.call('HMGET', KEYS[1], 'adaptive_max', 'consecutive_failures', 'penalty_until')
local max = clamp_max(state[1], ceiling)
local failures = (tonumber(state[2]) or 0) + 1

if failures % threshold == 0 then
    max = math.max(max - 1, 1)
end

redis.call('HSET', KEYS[1], 'adaptive_max', max, 'consecutive_failures', failures, 'consecutive_successes', 0)
redis.call('HINCRBY', KEYS[1], 'failures', 1)

local penalty = 0
if severe then
    penalty = math.floor(math.min(cap, base * 2 ^ failures))
    local current = tonumber(state[3]) or 0
    if now + penalty > current then
        redis.call('HSET', KEYS[1], 'penalty_until', now + penalty)
    end
    redis.call('HINCRBY', KEYS[1], 'severe_failures', 1)
end

redis.call('EXPIRE', KEYS[1], ttl)

return penalty
";

const SNAPSHOT_FIELDS: [&str; 10] = [
    "in_flight",
    "adaptive_max",
    "consecutive_failures",
    "consecutive_successes",
    "penalty_until",
    "last_attempt",
    "acquired",
    "successes",
    "failures",
    "severe_failures",
];

/// Throttle state shared by every process pointed at the same Redis and
/// key prefix.
#[derive(Debug)]
pub struct RedisThrottle {
    store: RedisStore,
    ttl_secs: u64,
    acquire: Script,
    release: Script,
    success: Script,
    failure: Script,
}

impl RedisThrottle {
    #[must_use]
    pub fn new(store: RedisStore, config: &CoordConfig) -> Self {
        Self {
            store,
            ttl_secs: config.state_ttl_secs.max(1),
            acquire: Script::new(&format!("{NOW_MS}{CLAMP_MAX}{ACQUIRE}")),
            release: Script::new(RELEASE),
            success: Script::new(&format!("{CLAMP_MAX}{SUCCESS}")),
            failure: Script::new(&format!("{NOW_MS}{CLAMP_MAX}{FAILURE}")),
        }
    }

    fn host_key(&self, host: &HostKey) -> String {
        self.store.key(&format!("throttle:host:{host}"))
    }

    fn global_key(&self) -> String {
        self.store.key("throttle:global")
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

#[async_trait]
impl ThrottleStore for RedisThrottle {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn try_acquire(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<AcquireDecision, StoreError> {
        let mut conn = self.store.connection().await?;

        let (reason, global, in_flight, max, wait): (String, u64, u64, u64, u64) = self
            .acquire
            .key(self.host_key(host))
            .key(self.global_key())
            .arg(limits.per_host_max_concurrency.max(1))
            .arg(limits.per_host_min_interval_ms)
            .arg(limits.global_max_concurrency)
            .arg(self.ttl_secs)
            .arg(u64::try_from(LIMIT_POLL.as_millis()).unwrap_or(u64::MAX))
            .invoke_async(&mut *conn)
            .await?;

        Ok(AcquireDecision {
            blocked_by: BlockReason::parse(&reason),
            global_in_flight: saturate(global),
            host_in_flight: saturate(in_flight),
            adaptive_max: saturate(max),
            retry_after: Duration::from_millis(wait),
        })
    }

    async fn release(&self, host: &HostKey) -> Result<bool, StoreError> {
        let mut conn = self.store.connection().await?;

        let released: bool = self
            .release
            .key(self.host_key(host))
            .key(self.global_key())
            .invoke_async(&mut *conn)
            .await?;

        Ok(released)
    }

    async fn record_success(
        &self,
        host: &HostKey,
        limits: &ThrottleLimits,
    ) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;

        let _: u64 = self
            .success
            .key(self.host_key(host))
            .arg(limits.per_host_max_concurrency.max(1))
            .arg(limits.success_threshold.max(1))
            .arg(self.ttl_secs)
            .invoke_async(&mut *conn)
            .await?;

        Ok(())
    }

    async fn record_failure(
        &self,
        host: &HostKey,
        severe: bool,
        limits: &ThrottleLimits,
    ) -> Result<(), StoreError> {
        let mut conn = self.store.connection().await?;

        let _: u64 = self
            .failure
            .key(self.host_key(host))
            .arg(limits.per_host_max_concurrency.max(1))
            .arg(limits.failure_threshold.max(1))
            .arg(u8::from(severe))
            .arg(limits.penalty_base_ms)
            .arg(limits.penalty_cap_ms)
            .arg(self.ttl_secs)
            .invoke_async(&mut *conn)
            .await?;

        Ok(())
    }

    async fn snapshot(&self, host: &HostKey) -> Result<Option<HostThrottleSnapshot>, StoreError> {
        let mut conn = self.store.connection().await?;

        let (fields, global, (secs, micros)): (Vec<Option<u64>>, Option<u64>, (u64, u64)) =
            redis::pipe()
                .atomic()
                .cmd("HMGET")
                .arg(self.host_key(host))
                .arg(&SNAPSHOT_FIELDS[..])
                .cmd("GET")
                .arg(self.global_key())
                .cmd("TIME")
                .query_async(&mut *conn)
                .await?;

        if fields.iter().all(Option::is_none) {
            return Ok(None);
        }

        let now = secs.saturating_mul(1_000) + micros / 1_000;
        let field = |index: usize| fields.get(index).copied().flatten();

        Ok(Some(HostThrottleSnapshot {
            in_flight: saturate(field(0).unwrap_or(0)),
            adaptive_max: saturate(field(1).unwrap_or(0)),
            consecutive_failures: saturate(field(2).unwrap_or(0)),
            consecutive_successes: saturate(field(3).unwrap_or(0)),
            penalty_remaining: field(4)
                .filter(|until| *until > now)
                .map(|until| Duration::from_millis(until - now)),
            since_last_attempt: field(5).map(|last| Duration::from_millis(now.saturating_sub(last))),
            acquired: field(6).unwrap_or(0),
            successes: field(7).unwrap_or(0),
            failures: field(8).unwrap_or(0),
            severe_failures: field(9).unwrap_or(0),
            global_in_flight: saturate(global.unwrap_or(0)),
        }))
    }
}
