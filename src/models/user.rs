use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The roles a training-management account can hold.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    AcademicDepartment,
    SqaAuditor,
    Trainer,
    Trainee,
    Other(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "ADMIN" => Role::Admin,
            "ACADEMIC_DEPARTMENT" => Role::AcademicDepartment,
            "SQA_AUDITOR" => Role::SqaAuditor,
            "TRAINER" => Role::Trainer,
            "TRAINEE" => Role::Trainee,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => "ADMIN".to_string(),
            Role::AcademicDepartment => "ACADEMIC_DEPARTMENT".to_string(),
            Role::SqaAuditor => "SQA_AUDITOR".to_string(),
            Role::Trainer => "TRAINER".to_string(),
            Role::Trainee => "TRAINEE".to_string(),
            Role::Other(other) => other,
        }
    }
}

/// The signed-in user record kept next to the tokens under the `user` key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    #[serde(default)]
    pub id: Value,
    pub username: String,
    pub role: Option<Role>,
    /// Whatever else the backend sends along (name, department, ...).
    #[serde(flatten)]
    pub attributes: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_round_trips_unknown_fields() {
        let raw = json!({
            "id": 12,
            "username": "sqa.lead",
            "role": "sqa-auditor",
            "department": "Flight Ops"
        });
        let user: User = serde_json::from_value(raw).expect("valid user record");
        assert_eq!(user.role, Some(Role::SqaAuditor));
        assert_eq!(user.attributes.get("department"), Some(&json!("Flight Ops")));

        let back = serde_json::to_value(&user).expect("serializable");
        assert_eq!(back["role"], "SQA_AUDITOR");
        assert_eq!(back["department"], "Flight Ops");
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        assert_eq!(
            Role::from("DISPATCHER".to_string()),
            Role::Other("DISPATCHER".to_string())
        );
    }
}
