//! Permission to policy tuple compilation
//!
//! A permission denotes alternatives in every dimension: any of its subjects,
//! combined with any value of each generic column. The compiled rule set is
//! the dense cross product of those alternatives.

use crate::entity::permission;

/// Number of generic columns after the subject
pub const GENERIC_COLUMNS: usize = 5;

/// One compiled rule: subject followed by V1..V5
pub type PolicyTuple = [String; GENERIC_COLUMNS + 1];

/// Placeholder standing in for an unconstrained column
const UNCONSTRAINED: &str = "";

/// Compile a permission into its policy tuples.
///
/// Subjects are the permission's users followed by its groups. Ordering is
/// subject-major, then V1 through V5 nested in input order.
pub fn compile(permission: &permission::Model) -> Vec<PolicyTuple> {
    cross_join(&permission.subjects(), permission.columns())
}

/// Number of tuples `compile` produces for this permission
pub fn rule_count(permission: &permission::Model) -> usize {
    permission
        .columns()
        .iter()
        .map(|column| column.len().max(1))
        .fold(permission.users.len() + permission.groups.len(), usize::saturating_mul)
}

pub fn cross_join(subjects: &[String], columns: [&[String]; GENERIC_COLUMNS]) -> Vec<PolicyTuple> {
    let placeholder = [UNCONSTRAINED.to_string()];
    let [v1s, v2s, v3s, v4s, v5s] = columns.map(|column| {
        if column.is_empty() {
            &placeholder[..]
        } else {
            column
        }
    });

    let capacity = subjects.len() * v1s.len() * v2s.len() * v3s.len() * v4s.len() * v5s.len();
    let mut tuples = Vec::with_capacity(capacity);

    for subject in subjects {
        for v1 in v1s {
            for v2 in v2s {
                for v3 in v3s {
                    for v4 in v4s {
                        for v5 in v5s {
                            tuples.push([
                                subject.clone(),
                                v1.clone(),
                                v2.clone(),
                                v3.clone(),
                                v4.clone(),
                                v5.clone(),
                            ]);
                        }
                    }
                }
            }
        }
    }

    tuples
}

/// Drop trailing empty columns until the rule matches `arity`.
///
/// Non-empty values are never removed; a rule still wider than `arity`
/// afterwards does not fit the policy definition.
pub fn fit_rule(mut rule: Vec<String>, arity: usize) -> Vec<String> {
    while rule.len() > arity && rule.last().is_some_and(|value| value.is_empty()) {
        rule.pop();
    }
    rule
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entity::StringList;

    pub(crate) fn permission(users: &[&str], groups: &[&str], columns: [&[&str]; 5]) -> permission::Model {
        let list = |values: &[&str]| StringList(values.iter().map(|v| v.to_string()).collect());
        let now = chrono::Utc::now();
        permission::Model {
            id: "perm-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            enforcer_id: "enf-1".to_string(),
            name: "test".to_string(),
            description: String::new(),
            users: list(users),
            groups: list(groups),
            v1: list(columns[0]),
            v2: list(columns[1]),
            v3: list(columns[2]),
            v4: list(columns[3]),
            v5: list(columns[4]),
            created_at: now,
            updated_at: now,
        }
    }

    fn generate(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_cross_join_full() {
        let subjects = generate("sub", 2);
        let columns: Vec<Vec<String>> = (1..=5).map(|i| generate(&format!("v{}-", i), 2)).collect();
        let result = cross_join(
            &subjects,
            [&columns[0], &columns[1], &columns[2], &columns[3], &columns[4]],
        );
        assert_eq!(result.len(), 64);
    }

    #[test]
    fn test_cross_join_missing_columns() {
        let subjects = generate("sub", 2);
        let v1s = generate("v1-", 2);
        let v2s = generate("v2-", 2);
        let result = cross_join(&subjects, [&v1s, &v2s, &[], &[], &[]]);
        assert_eq!(result.len(), 8);
        assert!(result.iter().all(|t| t[3..].iter().all(String::is_empty)));
    }

    #[test]
    fn test_cardinality_matches_rule_count() {
        let p = permission(&["u1"], &["g1"], [&["a", "b", "c"], &[], &[], &[], &[]]);
        assert_eq!(compile(&p).len(), 6);
        assert_eq!(rule_count(&p), 6);

        let p = permission(&["u1", "u2"], &[], [&["a"], &["x", "y"], &["m"], &["n", "o", "p"], &[]]);
        assert_eq!(compile(&p).len(), 2 * 1 * 2 * 1 * 3 * 1);
        assert_eq!(rule_count(&p), 12);
    }

    #[test]
    fn test_empty_columns_become_placeholders() {
        let p = permission(&["u1", "u2"], &[], [&["read"], &[], &[], &[], &[]]);
        let tuples = compile(&p);
        assert_eq!(tuples.len(), 2);
        for tuple in &tuples {
            assert_eq!(tuple[1], "read");
            assert!(tuple[2..].iter().all(|v| v.is_empty()));
        }
    }

    #[test]
    fn test_no_subjects_no_tuples() {
        let p = permission(&[], &[], [&["read"], &[], &[], &[], &[]]);
        assert!(compile(&p).is_empty());
        assert_eq!(rule_count(&p), 0);
    }

    #[test]
    fn test_order_is_subject_major() {
        let p = permission(&["u1"], &["g1"], [&["read", "write"], &["doc"], &[], &[], &[]]);
        let tuples = compile(&p);
        let first_columns: Vec<(&str, &str)> = tuples
            .iter()
            .map(|t| (t[0].as_str(), t[1].as_str()))
            .collect();
        assert_eq!(
            first_columns,
            vec![("u1", "read"), ("u1", "write"), ("g1", "read"), ("g1", "write")]
        );
    }

    #[test]
    fn test_duplicate_subjects_are_preserved() {
        let p = permission(&["u1", "u1"], &[], [&["read"], &[], &[], &[], &[]]);
        assert_eq!(compile(&p).len(), 2);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let p = permission(&["u1", "u2"], &["g1"], [&["r", "w"], &["a", "b"], &[], &["z"], &[]]);
        assert_eq!(compile(&p), compile(&p));
    }

    #[test]
    fn test_single_user_two_actions() {
        let p = permission(&["u1"], &[], [&["read", "write"], &[], &[], &[], &[]]);
        let expected: Vec<PolicyTuple> = vec![
            ["u1", "read", "", "", "", ""].map(String::from),
            ["u1", "write", "", "", "", ""].map(String::from),
        ];
        assert_eq!(compile(&p), expected);
    }

    #[test]
    fn test_fit_rule() {
        let rule = ["u1", "read", "", "", "", ""].map(String::from).to_vec();
        assert_eq!(fit_rule(rule.clone(), 3), vec!["u1", "read", ""]);
        assert_eq!(fit_rule(rule.clone(), 6).len(), 6);
        assert_eq!(fit_rule(rule, 0), vec!["u1", "read"]);

        let wide = ["u1", "read", "", "x"].map(String::from).to_vec();
        assert_eq!(fit_rule(wide, 2).len(), 4);
    }
}
