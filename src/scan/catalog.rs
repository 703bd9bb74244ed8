//! Built-in catalogue of risky IAM actions.

use crate::types::Severity;

/// Escalation methods and the actions that must all be allowed
pub(crate) const PRIVILEGE_ESCALATION_METHODS: &[(&str, &[&str])] = &[
    ("CreateNewPolicyVersion", &["iam:CreatePolicyVersion"]),
    ("SetExistingDefaultPolicyVersion", &["iam:SetDefaultPolicyVersion"]),
    ("CreateAccessKey", &["iam:CreateAccessKey"]),
    ("CreateLoginProfile", &["iam:CreateLoginProfile"]),
    ("UpdateLoginProfile", &["iam:UpdateLoginProfile"]),
    ("AttachUserPolicy", &["iam:AttachUserPolicy"]),
    ("AttachGroupPolicy", &["iam:AttachGroupPolicy"]),
    ("AttachRolePolicy", &["iam:AttachRolePolicy", "sts:AssumeRole"]),
    ("PutUserPolicy", &["iam:PutUserPolicy"]),
    ("PutGroupPolicy", &["iam:PutGroupPolicy"]),
    ("PutRolePolicy", &["iam:PutRolePolicy", "sts:AssumeRole"]),
    ("AddUserToGroup", &["iam:AddUserToGroup"]),
    (
        "UpdateRolePolicyToAssumeIt",
        &["iam:UpdateAssumeRolePolicy", "sts:AssumeRole"],
    ),
    (
        "PassExistingRoleToNewLambdaThenInvoke",
        &["iam:PassRole", "lambda:CreateFunction", "lambda:InvokeFunction"],
    ),
    (
        "PassExistingRoleToNewLambdaThenTriggerWithExistingDynamo",
        &[
            "iam:PassRole",
            "lambda:CreateFunction",
            "lambda:CreateEventSourceMapping",
        ],
    ),
    (
        "PassExistingRoleToNewGlueDevEndpoint",
        &["iam:PassRole", "glue:CreateDevEndpoint"],
    ),
    ("UpdateExistingGlueDevEndpoint", &["glue:UpdateDevEndpoint"]),
    (
        "PassExistingRoleToCloudFormation",
        &["iam:PassRole", "cloudformation:CreateStack"],
    ),
    (
        "PassExistingRoleToNewDataPipeline",
        &["iam:PassRole", "datapipeline:CreatePipeline"],
    ),
    ("EditExistingLambdaFunctionWithRole", &["lambda:UpdateFunctionCode"]),
    (
        "PassExistingRoleToNewCodeStarProject",
        &["iam:PassRole", "codestar:CreateProject"],
    ),
    ("CreateEC2WithExistingIP", &["iam:PassRole", "ec2:RunInstances"]),
];

/// Actions that can open a resource to other principals
pub(crate) const RESOURCE_EXPOSURE_ACTIONS: &[&str] = &[
    "iam:AttachGroupPolicy",
    "iam:AttachRolePolicy",
    "iam:AttachUserPolicy",
    "iam:CreatePolicyVersion",
    "iam:PutGroupPolicy",
    "iam:PutRolePolicy",
    "iam:PutUserPolicy",
    "iam:SetDefaultPolicyVersion",
    "iam:UpdateAssumeRolePolicy",
    "s3:DeleteBucketPolicy",
    "s3:PutBucketAcl",
    "s3:PutBucketPolicy",
    "s3:PutObjectAcl",
    "kms:CreateGrant",
    "kms:PutKeyPolicy",
    "lambda:AddLayerVersionPermission",
    "lambda:AddPermission",
    "sns:AddPermission",
    "sns:SetTopicAttributes",
    "sqs:AddPermission",
    "sqs:SetQueueAttributes",
    "ecr:SetRepositoryPolicy",
    "secretsmanager:PutResourcePolicy",
    "glacier:SetVaultAccessPolicy",
    "ram:CreateResourceShare",
];

/// Actions that return usable credentials
pub(crate) const CREDENTIALS_EXPOSURE_ACTIONS: &[&str] = &[
    "iam:CreateAccessKey",
    "iam:CreateServiceSpecificCredential",
    "iam:ResetServiceSpecificCredential",
    "iam:UpdateAccessKey",
    "iam:UploadSSHPublicKey",
    "sts:AssumeRole",
    "sts:AssumeRoleWithSAML",
    "sts:AssumeRoleWithWebIdentity",
    "sts:GetFederationToken",
    "sts:GetSessionToken",
    "ec2:GetPasswordData",
    "ecr:GetAuthorizationToken",
    "redshift:GetClusterCredentials",
    "lightsail:GetInstanceAccessDetails",
    "cognito-identity:GetCredentialsForIdentity",
    "sso:GetRoleCredentials",
    "appsync:CreateApiKey",
];

/// Baseline data exfiltration actions; exclusions may add more
pub(crate) const DATA_EXFILTRATION_ACTIONS: &[&str] = &[
    "s3:GetObject",
    "ssm:GetParameter",
    "ssm:GetParameters",
    "ssm:GetParametersByPath",
    "secretsmanager:GetSecretValue",
];

/// Action name prefixes that change infrastructure
const WRITE_VERBS: &[&str] = &[
    "Add", "Associate", "Attach", "Create", "Delete", "Detach", "Disable", "Enable", "Modify",
    "Put", "Reboot", "Remove", "Replace", "Reset", "Restore", "Run", "Set", "Start", "Stop",
    "Terminate", "Update", "Upload",
];

pub(crate) const PRIVILEGE_ESCALATION_SEVERITY: Severity = Severity::High;
pub(crate) const RESOURCE_EXPOSURE_SEVERITY: Severity = Severity::High;
pub(crate) const CREDENTIALS_EXPOSURE_SEVERITY: Severity = Severity::Medium;
pub(crate) const DATA_EXFILTRATION_SEVERITY: Severity = Severity::Medium;
pub(crate) const INFRASTRUCTURE_MODIFICATION_SEVERITY: Severity = Severity::Low;
pub(crate) const SERVICE_WILDCARD_SEVERITY: Severity = Severity::Medium;
/// `"Action": "*"`
pub(crate) const FULL_WILDCARD_SEVERITY: Severity = Severity::Critical;

/// Every catalogued action, used to expand wildcard patterns
pub(crate) fn all_catalogued_actions() -> impl Iterator<Item = &'static str> {
    PRIVILEGE_ESCALATION_METHODS
        .iter()
        .flat_map(|(_, actions)| actions.iter().copied())
        .chain(RESOURCE_EXPOSURE_ACTIONS.iter().copied())
        .chain(CREDENTIALS_EXPOSURE_ACTIONS.iter().copied())
        .chain(DATA_EXFILTRATION_ACTIONS.iter().copied())
}

/// Whether an action name (service:Name) modifies infrastructure
pub(crate) fn is_write_action(action: &str) -> bool {
    let Some((_, name)) = action.split_once(':') else {
        return false;
    };
    WRITE_VERBS.iter().any(|verb| {
        name.get(..verb.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(verb))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_write_action() {
        assert!(is_write_action("ec2:RunInstances"));
        assert!(is_write_action("s3:PutObject"));
        assert!(is_write_action("iam:createrole"));
        assert!(!is_write_action("s3:GetObject"));
        assert!(!is_write_action("ec2:DescribeInstances"));
        assert!(!is_write_action("not-an-action"));
    }

    #[test]
    fn test_catalogue_actions_are_qualified() {
        assert!(all_catalogued_actions().all(|a| a.contains(':')));
    }
}
