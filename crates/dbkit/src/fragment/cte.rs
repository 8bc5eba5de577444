//! CTE flattening and `WITH` clause rendering.
//!
//! Collection is post-order: a CTE registered on another CTE's body is a
//! dependency of that body and must be listed before it in the `WITH`
//! clause. Entries are de-duplicated by key across the whole tree, so a
//! logical subquery contributed from several call sites appears exactly
//! once. Alias assignment and reference resolution happen here, lazily, only
//! when the outermost fragment is rendered.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::{Cte, CteKey, Segment, SqlFragment, lock_ignore_poison};
use crate::error::{DbError, DbResult};
use crate::value::Param;

struct Resolved {
    key: CteKey,
    alias: String,
    body: Arc<Mutex<SqlFragment>>,
    recursive: bool,
}

pub(super) fn render(frag: &SqlFragment) -> DbResult<(String, Vec<Param>)> {
    let resolved = collect(frag);
    if resolved.is_empty() {
        let mut sql = String::new();
        write_segments(frag.segments(), &HashMap::new(), &mut sql)?;
        return Ok((sql, frag.own_params().to_vec()));
    }

    let aliases: HashMap<CteKey, String> = resolved
        .iter()
        .map(|r| (r.key.clone(), r.alias.clone()))
        .collect();

    let mut sql = if resolved.iter().any(|r| r.recursive) {
        String::from("WITH RECURSIVE ")
    } else {
        String::from("WITH ")
    };
    let mut params = Vec::new();

    for (i, r) in resolved.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&r.alias);
        sql.push_str(" AS (");
        let body = lock_ignore_poison(&r.body);
        write_segments(body.segments(), &aliases, &mut sql)?;
        params.extend(body.own_params().iter().cloned());
        sql.push(')');
    }

    sql.push(' ');
    write_segments(frag.segments(), &aliases, &mut sql)?;
    params.extend(frag.own_params().iter().cloned());

    Ok((sql, params))
}

pub(super) fn flattened_params(frag: &SqlFragment) -> Vec<Param> {
    let resolved = collect(frag);
    let mut params = Vec::new();
    for r in &resolved {
        params.extend(lock_ignore_poison(&r.body).own_params().iter().cloned());
    }
    params.extend(frag.own_params().iter().cloned());
    params
}

// Post-order walk over the CTE tree. Bodies are not kept locked across
// recursion: a body shared under two keys would otherwise self-deadlock.
fn collect(frag: &SqlFragment) -> Vec<Resolved> {
    let mut seen = HashSet::new();
    let mut visiting = HashSet::new();
    let mut order = Vec::new();
    visit(frag.cte_entries(), &mut seen, &mut visiting, &mut order);

    let mut names = AliasNames::default();
    order
        .into_iter()
        .map(|(key, cte)| Resolved {
            alias: names.assign(&cte.preferred_name),
            body: cte.body,
            recursive: cte.recursive,
            key,
        })
        .collect()
}

fn visit(
    entries: &[(CteKey, Cte)],
    seen: &mut HashSet<CteKey>,
    visiting: &mut HashSet<CteKey>,
    order: &mut Vec<(CteKey, Cte)>,
) {
    for (key, cte) in entries {
        if seen.contains(key) || visiting.contains(key) {
            continue;
        }
        visiting.insert(key.clone());
        let nested = lock_ignore_poison(&cte.body).cte_entries().to_vec();
        visit(&nested, seen, visiting, order);
        visiting.remove(key);
        seen.insert(key.clone());
        order.push((key.clone(), cte.clone()));
    }
}

fn write_segments(
    segments: &[Segment],
    aliases: &HashMap<CteKey, String>,
    out: &mut String,
) -> DbResult<()> {
    for seg in segments {
        match seg {
            Segment::Raw(s) => out.push_str(s),
            Segment::CteRef(key) => match aliases.get(key) {
                Some(alias) => out.push_str(alias),
                None => {
                    return Err(DbError::composition(format!(
                        "reference to unregistered CTE key '{}'",
                        key.as_str()
                    )));
                }
            },
        }
    }
    Ok(())
}

/// Collision-free alias assignment: the sanitized preferred name if free,
/// otherwise `name_2`, `name_3`, ...
#[derive(Default)]
struct AliasNames {
    used: HashSet<String>,
}

impl AliasNames {
    fn assign(&mut self, preferred: &str) -> String {
        let base = sanitize(preferred);
        let mut candidate = base.clone();
        let mut n = 1;
        while !self.used.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{base}_{n}");
        }
        candidate
    }
}

// Reduce a proposed name to a legal bare identifier.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    match out.chars().next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => out,
        _ => format!("cte_{out}"),
    }
}
