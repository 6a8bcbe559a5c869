//! # Command context: chained variables for command templates.
//!
//! Templates use `%(key)s` placeholders (and `%%` for a literal percent sign).
//! Lookups walk a chain of contexts, nearest first:
//!
//! ```text
//! instance { id, instance_number, node, pid_file }
//!    └─► service { name, count, ... service vars }
//!           └─► global { ... runtime vars }
//! ```
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use servicevisor::CommandContext;
//!
//! let global = Arc::new(CommandContext::from_pairs([("run_dir", "/var/run")], None));
//! let svc = CommandContext::from_pairs([("name", "web")], Some(global));
//! assert_eq!(
//!     svc.render("cat %(run_dir)s/%(name)s.pid | xargs kill -0").unwrap(),
//!     "cat /var/run/web.pid | xargs kill -0",
//! );
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RenderError;

/// One link of a variable chain.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    vars: BTreeMap<String, String>,
    parent: Option<Arc<CommandContext>>,
}

impl CommandContext {
    pub fn new(vars: BTreeMap<String, String>, parent: Option<Arc<CommandContext>>) -> Self {
        Self { vars, parent }
    }

    pub fn from_pairs<K, V, I>(pairs: I, parent: Option<Arc<CommandContext>>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { vars, parent }
    }

    /// Sets a variable on this link (shadows parents).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Looks `key` up along the chain.
    pub fn get(&self, key: &str) -> Option<&str> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if let Some(v) = c.vars.get(key) {
                return Some(v.as_str());
            }
            ctx = c.parent.as_deref();
        }
        None
    }

    /// Substitutes every `%(key)s` in `template`.
    pub fn render(&self, template: &str) -> Result<String, RenderError> {
        let malformed = |at: usize| RenderError::Malformed {
            template: template.to_string(),
            at,
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let at = offset + pos;
            let tail = &rest[pos + 1..];

            if let Some(after) = tail.strip_prefix('%') {
                out.push('%');
                offset = at + 2;
                rest = after;
                continue;
            }

            let body = tail.strip_prefix('(').ok_or_else(|| malformed(at))?;
            let close = body.find(')').ok_or_else(|| malformed(at))?;
            let key = &body[..close];
            let after = body[close + 1..]
                .strip_prefix('s')
                .ok_or_else(|| malformed(at))?;

            let value = self.get(key).ok_or_else(|| RenderError::MissingKey {
                key: key.to_string(),
                template: template.to_string(),
            })?;
            out.push_str(value);

            // '%' + '(' + key + ')' + 's'
            offset = at + key.len() + 4;
            rest = after;
        }
        out.push_str(rest);
        Ok(out)
    }
}
