//! Rewrites document-path references when the host renames a document.

use crate::core::keys::{ORDER_KEY_SEPARATOR, split_order_key};
use crate::core::{DayState, MonthlyDayStateFile};
use std::collections::BTreeMap;

/// Rewrites every reference to `old_path` in one day. Returns whether anything changed.
pub fn rename_paths_in_day_state(state: &mut DayState, old_path: &str, new_path: &str) -> bool {
    if old_path.is_empty() || old_path == new_path {
        return false;
    }
    let mut mutated = false;

    for entry in &mut state.hidden_routines {
        if entry.path == old_path {
            entry.path = new_path.to_string();
            mutated = true;
        }
    }

    for entry in &mut state.deleted_instances {
        if entry.path.as_deref() == Some(old_path) {
            entry.path = Some(new_path.to_string());
            mutated = true;
        }
    }

    for entry in &mut state.duplicated_instances {
        if entry.original_path == old_path {
            entry.original_path = new_path.to_string();
            mutated = true;
        }
    }

    mutated |= rename_key(&mut state.slot_overrides, old_path, new_path);
    mutated |= rename_key(&mut state.slot_overrides_meta, old_path, new_path);
    mutated |= rename_order_keys(&mut state.orders, old_path, new_path);
    mutated |= rename_order_keys(&mut state.orders_meta, old_path, new_path);

    mutated
}

/// Applies [`rename_paths_in_day_state`] to every day and bumps `lastUpdated` on change.
pub fn rename_paths_in_monthly_state(
    month: &mut MonthlyDayStateFile,
    old_path: &str,
    new_path: &str,
) -> bool {
    let mut mutated = false;
    for state in month.days.values_mut() {
        mutated |= rename_paths_in_day_state(state, old_path, new_path);
    }
    if mutated {
        month.touch();
    }
    mutated
}

fn rename_key<V>(map: &mut BTreeMap<String, V>, old_key: &str, new_key: &str) -> bool {
    match map.remove(old_key) {
        Some(value) => {
            map.insert(new_key.to_string(), value);
            true
        }
        None => false,
    }
}

fn rename_order_keys<V>(map: &mut BTreeMap<String, V>, old_path: &str, new_path: &str) -> bool {
    let matching: Vec<String> = map
        .keys()
        .filter(|key| matches!(split_order_key(key), Some((doc, _)) if doc == old_path))
        .cloned()
        .collect();

    for key in &matching {
        let Some((_, slot)) = split_order_key(key) else {
            continue;
        };
        if let Some(value) = map.remove(key) {
            map.insert(format!("{}{}{}", new_path, ORDER_KEY_SEPARATOR, slot), value);
        }
    }
    !matching.is_empty()
}
