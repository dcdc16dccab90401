use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::core::models::member::{Member, MemberStatus, Role};
use crate::core::models::organisation::Organisation;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "organisation.manage")]
    OrganisationManage,
    #[serde(rename = "organisation.delete")]
    OrganisationDelete,
    #[serde(rename = "members.manage")]
    MembersManage,
    #[serde(rename = "forms.create")]
    FormsCreate,
    #[serde(rename = "forms.edit")]
    FormsEdit,
    #[serde(rename = "forms.delete")]
    FormsDelete,
    #[serde(rename = "forms.publish")]
    FormsPublish,
    #[serde(rename = "submissions.view")]
    SubmissionsView,
    #[serde(rename = "submissions.export")]
    SubmissionsExport,
    #[serde(rename = "templates.create")]
    TemplatesCreate,
    #[serde(rename = "templates.edit")]
    TemplatesEdit,
    #[serde(rename = "templates.delete")]
    TemplatesDelete,
}

pub const ALL_PERMISSIONS: [Permission; 12] = [
    Permission::OrganisationManage,
    Permission::OrganisationDelete,
    Permission::MembersManage,
    Permission::FormsCreate,
    Permission::FormsEdit,
    Permission::FormsDelete,
    Permission::FormsPublish,
    Permission::SubmissionsView,
    Permission::SubmissionsExport,
    Permission::TemplatesCreate,
    Permission::TemplatesEdit,
    Permission::TemplatesDelete,
];

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::OrganisationManage => "organisation.manage",
            Permission::OrganisationDelete => "organisation.delete",
            Permission::MembersManage => "members.manage",
            Permission::FormsCreate => "forms.create",
            Permission::FormsEdit => "forms.edit",
            Permission::FormsDelete => "forms.delete",
            Permission::FormsPublish => "forms.publish",
            Permission::SubmissionsView => "submissions.view",
            Permission::SubmissionsExport => "submissions.export",
            Permission::TemplatesCreate => "templates.create",
            Permission::TemplatesEdit => "templates.edit",
            Permission::TemplatesDelete => "templates.delete",
        }
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PERMISSIONS
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| Error::field("permissions", &format!("unknown permission {}", s)))
    }
}

impl Role {
    /// Static permission set of the role.
    pub fn permissions(&self) -> Vec<Permission> {
        match self {
            Role::Owner => ALL_PERMISSIONS.to_vec(),
            Role::Admin => ALL_PERMISSIONS.iter().copied().filter(|p| *p != Permission::OrganisationDelete).collect(),
            Role::Editor => vec![
                Permission::FormsCreate,
                Permission::FormsEdit,
                Permission::FormsPublish,
                Permission::SubmissionsView,
                Permission::TemplatesCreate,
                Permission::TemplatesEdit,
            ],
            Role::Viewer => vec![Permission::SubmissionsView],
        }
    }
}

/// Answers whether a role carries a permission.
pub trait RoleGrants {
    fn grants(&self, role: Role, permission: Permission) -> Result<bool, Error>;
}

/// Resolves a permission for `user_id` within `organisation`.
///
/// Only active members hold permissions. The organisation owner holds all of
/// them; a member with an override list holds exactly that list, anyone else
/// falls back to their role.
pub fn resolve<G>(grants: &G, organisation: &Organisation, member: Option<&Member>, user_id: i32, permission: Permission) -> Result<bool, Error>
where
    G: RoleGrants,
{
    let member = match member {
        Some(m) if m.user_id == user_id && m.status == MemberStatus::Active => m,
        _ => return Ok(false),
    };
    if organisation.owner_id == user_id {
        return Ok(true);
    }
    if let Some(overrides) = &member.permissions {
        return Ok(overrides.iter().any(|p| p == permission.as_str()));
    }
    grants.grants(member.role, permission)
}

/// Parses an override list, rejecting unknown permission names.
pub fn parse_overrides(permissions: &[String]) -> Result<Vec<Permission>, Error> {
    permissions.iter().map(|p| p.parse()).collect()
}
