//! Lua scripts run atomically on the Redis server.
//!
//! `TOGGLE` evaluates the same guards, in the same order, as
//! [`toggleboard_core::pure::next_transition`]: frozen, then cap, then
//! direction. Time comes from the server's `TIME` so every process sharing the
//! store agrees on it.

/// Toggle transaction.
///
/// KEYS: bitset, count, frozen bitset, frozen count, last-checked hash, freeze threshold.
/// ARGV: index, cap. Returns `{bit, delta, frozen}`.
pub const TOGGLE: &str = r#"
local bitset_key = KEYS[1]
local count_key = KEYS[2]
local frozen_key = KEYS[3]
local frozen_count_key = KEYS[4]
local last_checked_key = KEYS[5]
local threshold_key = KEYS[6]
local index = tonumber(ARGV[1])
local cap = tonumber(ARGV[2])

local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local threshold = tonumber(redis.call('GET', threshold_key) or '-1')
local count = tonumber(redis.call('GET', count_key) or '0')
local bit = redis.call('GETBIT', bitset_key, index)

if redis.call('GETBIT', frozen_key, index) == 1 then
  return {bit, 0, 0}
end
if count >= cap then
  return {bit, 0, 0}
end

local new_bit = 1 - bit
local delta = new_bit - bit
if new_bit == 0 then
  local last = redis.call('HGET', last_checked_key, index)
  if last and threshold >= 0 and now - tonumber(last) >= threshold then
    redis.call('SETBIT', frozen_key, index, 1)
    redis.call('INCR', frozen_count_key)
    redis.call('HDEL', last_checked_key, index)
    return {1, 0, 1}
  end
  redis.call('HDEL', last_checked_key, index)
else
  redis.call('HSET', last_checked_key, index, now)
end

redis.call('SETBIT', bitset_key, index, new_bit)
redis.call('SET', count_key, count + delta)
return {new_bit, delta, 0}
"#;

/// Sweeper freeze.
///
/// KEYS: bitset, frozen bitset, last-checked hash, frozen count.
/// ARGV: index, cutoff ms. Returns 1 when the cell was frozen.
pub const FREEZE_IF_STALE: &str = r#"
local index = tonumber(ARGV[1])
local cutoff = tonumber(ARGV[2])
local checked_at = redis.call('HGET', KEYS[3], index)
if not checked_at or tonumber(checked_at) >= cutoff then
  return 0
end
if redis.call('GETBIT', KEYS[1], index) == 0 then
  return 0
end
if redis.call('GETBIT', KEYS[2], index) == 1 then
  return 0
end
redis.call('SETBIT', KEYS[2], index, 1)
redis.call('INCR', KEYS[4])
redis.call('HDEL', KEYS[3], index)
return 1
"#;

/// Counter repair.
///
/// KEYS: bitset, frozen bitset, count, frozen count. Returns `{count, frozen_count}`.
pub const RECONCILE: &str = r#"
local count = redis.call('BITCOUNT', KEYS[1])
local frozen = redis.call('BITCOUNT', KEYS[2])
redis.call('SET', KEYS[3], count)
redis.call('SET', KEYS[4], frozen)
return {count, frozen}
"#;

#[cfg(test)]
mod tests {
    use toggleboard_core::pure::ToggleRead;
    use toggleboard_core::pure::Transition;
    use toggleboard_core::pure::next_transition;

    use super::*;

    /// Guard markers in `TOGGLE`, in evaluation order.
    const TOGGLE_GUARDS: [(&str, &str); 3] = [
        ("frozen", "if redis.call('GETBIT', frozen_key, index) == 1 then"),
        ("cap", "if count >= cap then"),
        ("direction", "if new_bit == 0 then"),
    ];

    #[test]
    fn toggle_guards_follow_transition_precedence() {
        // Every guard fires on this read; each row clears the guards before it.
        let all_guards = ToggleRead {
            bit: true,
            frozen: true,
            last_checked_ms: Some(0),
            count: 10,
            freeze_threshold_ms: Some(0),
            now_ms: 5,
        };
        let cases = [
            (all_guards, Transition::AlreadyFrozen),
            (
                ToggleRead {
                    frozen: false,
                    ..all_guards
                },
                Transition::CapReached,
            ),
            (
                ToggleRead {
                    frozen: false,
                    count: 0,
                    ..all_guards
                },
                Transition::Freeze,
            ),
            (
                ToggleRead {
                    frozen: false,
                    count: 0,
                    last_checked_ms: None,
                    ..all_guards
                },
                Transition::Uncheck,
            ),
            (
                ToggleRead {
                    frozen: false,
                    count: 0,
                    bit: false,
                    ..all_guards
                },
                Transition::Check { at_ms: 5 },
            ),
        ];
        for (read, expected) in cases {
            assert_eq!(next_transition(&read, 10), expected, "read: {read:?}");
        }

        let positions: Vec<usize> = TOGGLE_GUARDS
            .iter()
            .map(|(name, marker)| TOGGLE.find(marker).unwrap_or_else(|| panic!("{name} guard missing")))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "guards out of order: {positions:?}");
    }

    #[test]
    fn last_checked_presence_is_tested_against_nil() {
        assert!(TOGGLE.contains("if last and threshold >= 0"));
        assert!(!TOGGLE.contains("HGET', last_checked_key, index) or"));
        assert!(FREEZE_IF_STALE.contains("if not checked_at or"));
        assert!(!FREEZE_IF_STALE.contains("HGET', KEYS[3], index) or"));
    }
}
