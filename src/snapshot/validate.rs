use serde_json::Value;

use super::AuthorizationSnapshot;

/// Structural check of a snapshot.
///
/// Returns every problem found rather than stopping at the first one.
pub fn validate_snapshot(snapshot: &AuthorizationSnapshot) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();

    for user in &snapshot.users {
        require_identity(&mut problems, "user", &user.user_name, &user.arn);
        for policy in &user.user_policy_list {
            check_document(
                &mut problems,
                &format!("inline policy {} of user {}", policy.policy_name, user.user_name),
                &policy.policy_document,
            );
        }
    }

    for group in &snapshot.groups {
        require_identity(&mut problems, "group", &group.group_name, &group.arn);
        for policy in &group.group_policy_list {
            check_document(
                &mut problems,
                &format!("inline policy {} of group {}", policy.policy_name, group.group_name),
                &policy.policy_document,
            );
        }
    }

    for role in &snapshot.roles {
        require_identity(&mut problems, "role", &role.role_name, &role.arn);
        for policy in &role.role_policy_list {
            check_document(
                &mut problems,
                &format!("inline policy {} of role {}", policy.policy_name, role.role_name),
                &policy.policy_document,
            );
        }
    }

    for policy in &snapshot.policies {
        require_identity(&mut problems, "managed policy", &policy.policy_name, &policy.arn);

        if policy.default_version_id.is_empty() {
            problems.push(format!(
                "managed policy {} has no DefaultVersionId",
                policy.policy_name
            ));
            continue;
        }

        if policy.policy_version_list.iter().any(|v| !v.is_default_version) {
            problems.push(format!(
                "managed policy {} contains non-default versions",
                policy.policy_name
            ));
        }

        let defaults: Vec<_> = policy
            .policy_version_list
            .iter()
            .filter(|v| v.is_default_version && v.version_id == policy.default_version_id)
            .collect();

        match defaults.as_slice() {
            [version] => check_document(
                &mut problems,
                &format!("managed policy {}", policy.policy_name),
                &version.document,
            ),
            [] => problems.push(format!(
                "managed policy {} is missing default version {}",
                policy.policy_name, policy.default_version_id
            )),
            _ => problems.push(format!(
                "managed policy {} has more than one default version",
                policy.policy_name
            )),
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn require_identity(problems: &mut Vec<String>, kind: &str, name: &str, arn: &str) {
    if name.is_empty() {
        problems.push(format!("{} with ARN '{}' has no name", kind, arn));
    }
    if arn.is_empty() {
        problems.push(format!("{} '{}' has no ARN", kind, name));
    }
}

fn check_document(problems: &mut Vec<String>, what: &str, document: &Value) {
    match document.get("Statement") {
        Some(Value::Array(_)) | Some(Value::Object(_)) => {}
        Some(_) => problems.push(format!("{} has a malformed Statement", what)),
        None => problems.push(format!("{} has no policy document Statement", what)),
    }
}
