//! Server-side session scripts.
//!
//! Each [`SessionScript`] is a named, versioned transaction over a session's
//! two keys (`KEYS[1]` info, `KEYS[2]` attributes). Redis runs the Lua body;
//! [`MemoryStore`](crate::store::MemoryStore) runs the equivalent native
//! transition through [`SessionScript::execute`] while holding its lock, so
//! both backends give the same all-or-nothing behaviour.
//!
//! Every guarded script opens with the same sequence:
//!
//! 1. `PTTL(info) <= 0` → error reply `TWINKEY -1`
//! 2. stop marker present → error reply `TWINKEY -2`
//! 3. required field missing → error reply `TWINKEY -3`

use crate::error::{StoreError, StoreResult};
use crate::session::field;
use crate::state::GuardCode;
use crate::store::ScriptReply;

/// Bumped whenever any script body changes; part of every script's id so a
/// new body never collides with a cached SHA of an old one.
pub const SCRIPT_VERSION: u32 = 1;

/// The transactions of the atomic session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionScript {
    /// `ARGV`: id, timeout ms, start ms, host.
    Init,
    GetStart,
    GetLast,
    GetTimeout,
    GetHost,
    /// `ARGV`: timeout ms.
    SetTimeout,
    /// `ARGV`: now ms.
    Touch,
    /// `ARGV`: now ms.
    Stop,
    GetAttributeKeys,
    /// `ARGV`: attribute key.
    GetAttribute,
    /// `ARGV`: attribute key, encoded value.
    SetAttribute,
    /// `ARGV`: attribute key.
    RemoveAttribute,
    Delete,
    RemainingTtl,
}

impl SessionScript {
    pub const ALL: [SessionScript; 14] = [
        SessionScript::Init,
        SessionScript::GetStart,
        SessionScript::GetLast,
        SessionScript::GetTimeout,
        SessionScript::GetHost,
        SessionScript::SetTimeout,
        SessionScript::Touch,
        SessionScript::Stop,
        SessionScript::GetAttributeKeys,
        SessionScript::GetAttribute,
        SessionScript::SetAttribute,
        SessionScript::RemoveAttribute,
        SessionScript::Delete,
        SessionScript::RemainingTtl,
    ];

    /// Short name of the script.
    pub fn name(self) -> &'static str {
        match self {
            SessionScript::Init => "init",
            SessionScript::GetStart => "get-start",
            SessionScript::GetLast => "get-last",
            SessionScript::GetTimeout => "get-timeout",
            SessionScript::GetHost => "get-host",
            SessionScript::SetTimeout => "set-timeout",
            SessionScript::Touch => "touch",
            SessionScript::Stop => "stop",
            SessionScript::GetAttributeKeys => "get-attribute-keys",
            SessionScript::GetAttribute => "get-attribute",
            SessionScript::SetAttribute => "set-attribute",
            SessionScript::RemoveAttribute => "remove-attribute",
            SessionScript::Delete => "delete",
            SessionScript::RemainingTtl => "remaining-ttl",
        }
    }

    /// Versioned identifier, e.g. `twinkey:touch:v1`.
    pub fn id(self) -> String {
        format!("twinkey:{}:v{}", self.name(), SCRIPT_VERSION)
    }

    /// Whether the script writes.
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            SessionScript::GetStart
                | SessionScript::GetLast
                | SessionScript::GetTimeout
                | SessionScript::GetHost
                | SessionScript::GetAttributeKeys
                | SessionScript::GetAttribute
                | SessionScript::RemainingTtl
        )
    }

    /// The Lua body, prefixed with its id.
    pub fn lua(self) -> String {
        let body = match self {
            SessionScript::Init => format!(
                "redis.call('HSET', KEYS[1], '{id}', ARGV[1], '{timeout}', ARGV[2], \
                 '{start}', ARGV[3], '{last}', ARGV[3], '{host}', ARGV[4])\n\
                 redis.call('PEXPIRE', KEYS[1], ARGV[2])\n\
                 return 1\n",
                id = field::ID,
                timeout = field::TIMEOUT,
                start = field::START,
                last = field::LAST_ACCESS,
                host = field::HOST,
            ),
            SessionScript::GetStart => guarded_field_read(field::START),
            SessionScript::GetLast => guarded_field_read(field::LAST_ACCESS),
            SessionScript::GetTimeout => guarded_field_read(field::TIMEOUT),
            SessionScript::GetHost => guarded_field_read(field::HOST),
            SessionScript::SetTimeout => format!(
                "{guard}\
                 if not redis.call('HGET', KEYS[1], '{timeout}') then\n  {invalid}\nend\n\
                 redis.call('HSET', KEYS[1], '{timeout}', ARGV[1])\n\
                 redis.call('PEXPIRE', KEYS[1], ARGV[1])\n\
                 redis.call('PEXPIRE', KEYS[2], ARGV[1])\n\
                 return 1\n",
                guard = guard_prelude(),
                timeout = field::TIMEOUT,
                invalid = error_reply(GuardCode::Invalid),
            ),
            SessionScript::Touch => format!(
                "{guard}\
                 local timeout = redis.call('HGET', KEYS[1], '{timeout}')\n\
                 if not timeout then\n  {invalid}\nend\n\
                 redis.call('HSET', KEYS[1], '{last}', ARGV[1])\n\
                 redis.call('PEXPIRE', KEYS[1], timeout)\n\
                 redis.call('PEXPIRE', KEYS[2], timeout)\n\
                 return 1\n",
                guard = guard_prelude(),
                timeout = field::TIMEOUT,
                last = field::LAST_ACCESS,
                invalid = error_reply(GuardCode::Invalid),
            ),
            // No stop guard: the first stop wins and later ones are no-ops.
            SessionScript::Stop => format!(
                "{expired}\
                 redis.call('HSETNX', KEYS[1], '{stop}', ARGV[1])\n\
                 return 1\n",
                expired = expired_guard(),
                stop = field::STOP,
            ),
            SessionScript::GetAttributeKeys => format!(
                "{guard}return redis.call('HKEYS', KEYS[2])\n",
                guard = guard_prelude(),
            ),
            SessionScript::GetAttribute => format!(
                "{guard}return redis.call('HGET', KEYS[2], ARGV[1])\n",
                guard = guard_prelude(),
            ),
            // An attribute hash that was emptied is deleted by Redis and loses
            // its TTL; the next HSET recreates it without one.
            SessionScript::SetAttribute => format!(
                "local pttl = redis.call('PTTL', KEYS[1])\n\
                 if pttl <= 0 then\n  {expired}\nend\n\
                 {stopped}\
                 redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])\n\
                 if redis.call('PTTL', KEYS[2]) <= 0 then\n\
                 \x20 redis.call('PEXPIRE', KEYS[2], pttl)\n\
                 end\n\
                 return 1\n",
                expired = error_reply(GuardCode::Expired),
                stopped = stopped_guard(),
            ),
            SessionScript::RemoveAttribute => format!(
                "{guard}\
                 local attr = redis.call('HGET', KEYS[2], ARGV[1])\n\
                 if attr then\n  redis.call('HDEL', KEYS[2], ARGV[1])\nend\n\
                 return attr\n",
                guard = guard_prelude(),
            ),
            SessionScript::Delete => "redis.call('UNLINK', KEYS[1], KEYS[2])\nreturn 1\n".to_string(),
            SessionScript::RemainingTtl => "return redis.call('PTTL', KEYS[1])\n".to_string(),
        };
        format!("-- {}\n{}", self.id(), body)
    }

    /// Run the script natively against `host`.
    pub(crate) fn execute<H: ScriptHost + ?Sized>(
        self,
        host: &mut H,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply> {
        let info = key(keys, 0)?;
        match self {
            SessionScript::Init => {
                let timeout = int_arg(args, 1)?;
                host.hset(info, field::ID, arg(args, 0)?);
                host.hset(info, field::TIMEOUT, arg(args, 1)?);
                host.hset(info, field::START, arg(args, 2)?);
                host.hset(info, field::LAST_ACCESS, arg(args, 2)?);
                host.hset(info, field::HOST, arg(args, 3)?);
                host.pexpire(info, timeout)?;
                Ok(ScriptReply::Int(1))
            }
            SessionScript::GetStart => read_guarded_field(host, info, field::START),
            SessionScript::GetLast => read_guarded_field(host, info, field::LAST_ACCESS),
            SessionScript::GetTimeout => read_guarded_field(host, info, field::TIMEOUT),
            SessionScript::GetHost => read_guarded_field(host, info, field::HOST),
            SessionScript::SetTimeout => {
                let attr = key(keys, 1)?;
                guard(host, info)?;
                if host.hget(info, field::TIMEOUT).is_none() {
                    return Err(StoreError::Rejected(GuardCode::Invalid));
                }
                let timeout = int_arg(args, 0)?;
                host.hset(info, field::TIMEOUT, arg(args, 0)?);
                host.pexpire(info, timeout)?;
                host.pexpire(attr, timeout)?;
                Ok(ScriptReply::Int(1))
            }
            SessionScript::Touch => {
                let attr = key(keys, 1)?;
                guard(host, info)?;
                let timeout = host
                    .hget(info, field::TIMEOUT)
                    .ok_or(StoreError::Rejected(GuardCode::Invalid))?;
                let timeout = parse_int(&timeout)?;
                host.hset(info, field::LAST_ACCESS, arg(args, 0)?);
                host.pexpire(info, timeout)?;
                host.pexpire(attr, timeout)?;
                Ok(ScriptReply::Int(1))
            }
            SessionScript::Stop => {
                if host.pttl(info) <= 0 {
                    return Err(StoreError::Rejected(GuardCode::Expired));
                }
                host.hset_nx(info, field::STOP, arg(args, 0)?);
                Ok(ScriptReply::Int(1))
            }
            SessionScript::GetAttributeKeys => {
                let attr = key(keys, 1)?;
                guard(host, info)?;
                Ok(ScriptReply::List(host.hkeys(attr)))
            }
            SessionScript::GetAttribute => {
                let attr = key(keys, 1)?;
                guard(host, info)?;
                Ok(host
                    .hget(attr, arg(args, 0)?)
                    .map_or(ScriptReply::Nil, ScriptReply::Text))
            }
            SessionScript::SetAttribute => {
                let attr = key(keys, 1)?;
                let pttl = host.pttl(info);
                if pttl <= 0 {
                    return Err(StoreError::Rejected(GuardCode::Expired));
                }
                if host.hexists(info, field::STOP) {
                    return Err(StoreError::Rejected(GuardCode::Stopped));
                }
                host.hset(attr, arg(args, 0)?, arg(args, 1)?);
                if host.pttl(attr) <= 0 {
                    host.pexpire(attr, pttl)?;
                }
                Ok(ScriptReply::Int(1))
            }
            SessionScript::RemoveAttribute => {
                let attr = key(keys, 1)?;
                guard(host, info)?;
                let name = arg(args, 0)?;
                match host.hget(attr, name) {
                    Some(value) => {
                        host.hdel(attr, name);
                        Ok(ScriptReply::Text(value))
                    }
                    None => Ok(ScriptReply::Nil),
                }
            }
            SessionScript::Delete => {
                let attr = key(keys, 1)?;
                host.unlink(info);
                host.unlink(attr);
                Ok(ScriptReply::Int(1))
            }
            SessionScript::RemainingTtl => Ok(ScriptReply::Int(host.pttl(info))),
        }
    }
}

/// Synchronous primitive operations a native script runs against.
///
/// Implementors must hold exclusive access to their data for the whole
/// [`SessionScript::execute`] call.
pub(crate) trait ScriptHost {
    fn pttl(&mut self, key: &str) -> i64;
    fn hexists(&mut self, key: &str, field: &str) -> bool;
    fn hget(&mut self, key: &str, field: &str) -> Option<String>;
    fn hset(&mut self, key: &str, field: &str, value: &str);
    fn hset_nx(&mut self, key: &str, field: &str, value: &str) -> bool;
    fn hdel(&mut self, key: &str, field: &str) -> bool;
    fn hkeys(&mut self, key: &str) -> Vec<String>;
    fn pexpire(&mut self, key: &str, millis: i64) -> StoreResult<bool>;
    fn unlink(&mut self, key: &str) -> bool;
}

fn guard<H: ScriptHost + ?Sized>(host: &mut H, info: &str) -> StoreResult<()> {
    if host.pttl(info) <= 0 {
        return Err(StoreError::Rejected(GuardCode::Expired));
    }
    if host.hexists(info, field::STOP) {
        return Err(StoreError::Rejected(GuardCode::Stopped));
    }
    Ok(())
}

fn read_guarded_field<H: ScriptHost + ?Sized>(
    host: &mut H,
    info: &str,
    name: &str,
) -> StoreResult<ScriptReply> {
    guard(host, info)?;
    host.hget(info, name)
        .map(ScriptReply::Text)
        .ok_or(StoreError::Rejected(GuardCode::Invalid))
}

fn error_reply(code: GuardCode) -> String {
    format!("return redis.error_reply('{}')", code.error_text())
}

fn expired_guard() -> String {
    format!(
        "if redis.call('PTTL', KEYS[1]) <= 0 then\n  {}\nend\n",
        error_reply(GuardCode::Expired)
    )
}

fn stopped_guard() -> String {
    format!(
        "if redis.call('HEXISTS', KEYS[1], '{}') == 1 then\n  {}\nend\n",
        field::STOP,
        error_reply(GuardCode::Stopped)
    )
}

fn guard_prelude() -> String {
    format!("{}{}", expired_guard(), stopped_guard())
}

fn guarded_field_read(name: &str) -> String {
    format!(
        "{guard}\
         local value = redis.call('HGET', KEYS[1], '{name}')\n\
         if not value then\n  {invalid}\nend\n\
         return value\n",
        guard = guard_prelude(),
        invalid = error_reply(GuardCode::Invalid),
    )
}

fn key(keys: &[String], i: usize) -> StoreResult<&str> {
    keys.get(i)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Backend(format!("ERR missing KEYS[{}]", i + 1)))
}

fn arg(args: &[String], i: usize) -> StoreResult<&str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Backend(format!("ERR missing ARGV[{}]", i + 1)))
}

fn int_arg(args: &[String], i: usize) -> StoreResult<i64> {
    parse_int(arg(args, i)?)
}

fn parse_int(s: &str) -> StoreResult<i64> {
    s.parse()
        .map_err(|_| StoreError::Backend("ERR value is not an integer or out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_versioned() {
        let ids: HashSet<String> = SessionScript::ALL.iter().map(|s| s.id()).collect();
        assert_eq!(ids.len(), SessionScript::ALL.len());
        assert_eq!(SessionScript::Touch.id(), "twinkey:touch:v1");
    }

    #[test]
    fn test_guarded_scripts_check_expiry_before_stop() {
        for script in [
            SessionScript::GetStart,
            SessionScript::Touch,
            SessionScript::SetTimeout,
            SessionScript::GetAttribute,
            SessionScript::RemoveAttribute,
        ] {
            let lua = script.lua();
            let expired = lua.find("TWINKEY -1").expect("expired guard");
            let stopped = lua.find("TWINKEY -2").expect("stopped guard");
            assert!(expired < stopped, "{} guards out of order", script.name());
        }
    }

    #[test]
    fn test_stop_script_has_no_stop_guard() {
        let lua = SessionScript::Stop.lua();
        assert!(lua.contains("HSETNX"));
        assert!(!lua.contains("TWINKEY -2"));
    }

    #[test]
    fn test_set_attribute_rearms_attr_ttl() {
        let lua = SessionScript::SetAttribute.lua();
        assert!(lua.contains("redis.call('PEXPIRE', KEYS[2], pttl)"));
    }

    #[test]
    fn test_write_classification() {
        assert!(SessionScript::Touch.is_write());
        assert!(SessionScript::Delete.is_write());
        assert!(!SessionScript::GetAttribute.is_write());
        assert!(!SessionScript::RemainingTtl.is_write());
    }
}
