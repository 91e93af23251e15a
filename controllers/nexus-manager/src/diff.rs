//! Desired-versus-live comparison
//!
//! A live object matches when every field the renderer sets is present and
//! equal in it. Fields added by the API server or other actors are ignored.
//! Lists must have the same length and match element by element. Resource
//! quantities compare by value, since the API server rewrites them in
//! canonical form (`1000m` comes back as `1`).
//!
//! Fields dropped from the desired state are caught through the rendered
//! hash annotation, which changes whenever the rendered object does.

use cluster_client::{GeneratedObject, ObjectKind};
use crds::labels::{MANAGED_BY, OPERATOR_NAME, RENDERED_HASH};
use serde_json::Value;

/// JSON paths (`/spec/template/...`) where `live` does not contain `desired`.
pub fn diverging_paths(desired: &Value, live: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect(desired, live, &mut String::new(), &mut paths);
    paths
}

/// JSON pointer escaping of one path segment.
fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn collect(desired: &Value, live: &Value, path: &mut String, out: &mut Vec<String>) {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => {
            for (key, want_value) in want {
                let len = path.len();
                path.push('/');
                path.push_str(&escape(key));
                match have.get(key) {
                    Some(have_value) => collect(want_value, have_value, path, out),
                    None if want_value.is_null() => {}
                    None => out.push(path.clone()),
                }
                path.truncate(len);
            }
        }
        (Value::Array(want), Value::Array(have)) if want.len() == have.len() => {
            for (index, (want_item, have_item)) in want.iter().zip(have).enumerate() {
                let len = path.len();
                path.push('/');
                path.push_str(&index.to_string());
                collect(want_item, have_item, path, out);
                path.truncate(len);
            }
        }
        _ if desired == live => {}
        (Value::String(want), Value::String(have)) if is_quantity_path(path) && same_quantity(want, have) => {}
        _ => out.push(if path.is_empty() { "/".to_string() } else { path.clone() }),
    }
}

/// True for values of a `requests` or `limits` map.
fn is_quantity_path(path: &str) -> bool {
    let mut segments = path.rsplit('/');
    segments.next();
    matches!(segments.next(), Some("requests" | "limits"))
}

fn same_quantity(a: &str, b: &str) -> bool {
    matches!((quantity_nanos(a), quantity_nanos(b)), (Some(x), Some(y)) if x == y)
}

/// Value of a Kubernetes quantity in units of 10^-9. `None` when the text
/// does not parse, overflows or is finer than a nano unit.
fn quantity_nanos(quantity: &str) -> Option<i128> {
    let end = quantity
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(end);
    let (negative, number) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let mut digits: i128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        digits = digits.checked_mul(10)?.checked_add(i128::from(c.to_digit(10)?))?;
    }
    let (multiplier, exponent) = suffix_scale(suffix)?;
    let exponent = 9i32
        .checked_add(exponent)?
        .checked_sub(i32::try_from(fraction.len()).ok()?)?;

    let scaled = digits.checked_mul(multiplier)?;
    let power = 10i128.checked_pow(exponent.unsigned_abs())?;
    let value = if exponent >= 0 {
        scaled.checked_mul(power)?
    } else if scaled % power == 0 {
        scaled / power
    } else {
        return None;
    };
    Some(if negative { -value } else { value })
}

/// Binary multiplier and decimal exponent of a quantity suffix.
fn suffix_scale(suffix: &str) -> Option<(i128, i32)> {
    const KI: i128 = 1024;
    Some(match suffix {
        "Ki" => (KI, 0),
        "Mi" => (KI.pow(2), 0),
        "Gi" => (KI.pow(3), 0),
        "Ti" => (KI.pow(4), 0),
        "Pi" => (KI.pow(5), 0),
        "Ei" => (KI.pow(6), 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "" => (1, 0),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        _ => (1, suffix.strip_prefix(['e', 'E'])?.parse().ok()?),
    })
}

/// Work one pass must do to bring the live set to the desired set.
#[derive(Debug, Default)]
pub struct Plan {
    /// Desired objects with no live counterpart
    pub create: Vec<GeneratedObject>,
    /// Desired objects, stamped with the live resourceVersion, and the paths that differ
    pub update: Vec<(GeneratedObject, Vec<String>)>,
    /// Owned live objects that are no longer desired
    pub delete: Vec<GeneratedObject>,
    /// Desired objects already in agreement
    pub unchanged: usize,
}

impl Plan {
    /// True when the pass has nothing to write.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

fn managed_by_operator(object: &GeneratedObject) -> bool {
    object
        .meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY))
        .is_some_and(|value| value == OPERATOR_NAME)
}

/// Pairs desired and owned live objects by kind and name. Only live objects
/// carrying the operator's managed-by label are ever deleted.
pub fn plan(desired: Vec<GeneratedObject>, live: &[GeneratedObject]) -> Result<Plan, serde_json::Error> {
    let wanted: Vec<(ObjectKind, String)> = desired
        .iter()
        .map(|o| (o.kind(), o.name().to_string()))
        .collect();
    let hash_path = format!("/metadata/annotations/{}", escape(RENDERED_HASH));
    let mut plan = Plan::default();

    for object in desired {
        let current = live
            .iter()
            .find(|l| l.kind() == object.kind() && l.name() == object.name());
        let Some(current) = current else {
            plan.create.push(object);
            continue;
        };
        let mut paths = diverging_paths(&object.to_value()?, &current.to_value()?);
        // The hash only says something when nothing else differs: a field was removed
        if paths.len() > 1 {
            paths.retain(|p| *p != hash_path);
        }
        if paths.is_empty() {
            plan.unchanged += 1;
        } else {
            let mut update = object;
            update.meta_mut().resource_version = current.resource_version().map(str::to_string);
            plan.update.push((update, paths));
        }
    }

    plan.delete = live
        .iter()
        .filter(|l| managed_by_operator(l))
        .filter(|l| !wanted.iter().any(|(kind, name)| *kind == l.kind() && name == l.name()))
        .cloned()
        .collect();

    Ok(plan)
}
