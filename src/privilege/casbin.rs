use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};

use crate::core::models::member::Role;
use crate::core::permission::{Permission, RoleGrants};
use crate::error::Error;

const MODEL: &str = r#"
[request_definition]
r = sub, act

[policy_definition]
p = sub, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.act == p.act
"#;

/// Role to permission table held by an in-memory casbin enforcer.
pub struct RolePolicy {
    enforcer: Enforcer,
}

impl RolePolicy {
    pub async fn new() -> Result<Self, Error> {
        let model = DefaultModel::from_str(MODEL).await?;
        let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
        let rules: Vec<Vec<String>> = Role::all()
            .iter()
            .flat_map(|role| role.permissions().into_iter().map(move |p| vec![role.as_str().to_owned(), p.as_str().to_owned()]))
            .collect();
        enforcer.add_policies(rules).await?;
        Ok(Self { enforcer })
    }
}

impl RoleGrants for RolePolicy {
    fn grants(&self, role: Role, permission: Permission) -> Result<bool, Error> {
        Ok(self.enforcer.enforce((role.as_str(), permission.as_str()))?)
    }
}
