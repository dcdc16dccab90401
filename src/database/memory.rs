use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::core::models::{
    activity::{Activity, Insert as ActivityInsert, Query as ActivityQuery},
    common::Pagination,
    form::{Form, Insert as FormInsert, Query as FormQuery, Update as FormUpdate},
    gdpr::{AccessRequest, AuditInsert, AuditLog, ConsentInsert, ConsentLog, RequestInsert, RequestStatus, RequestUpdate, RetentionPolicy, RetentionPolicyCreate},
    member::{Insert as MemberInsert, Member, MemberDetail, MemberStatus, Role},
    organisation::{HierarchyRow, Insert as OrganisationInsert, Organisation, Query as OrganisationQuery, Related, Update as OrganisationUpdate},
    schema::{FieldInsert, FormField, Section, SectionInsert},
    settings::FormSettings,
    submission::{FieldInsert as AnswerInsert, Insert as SubmissionInsert, Query as SubmissionQuery, Submission, SubmissionField, SubmissionStatus, Update as SubmissionUpdate},
    template::{Insert as TemplateInsert, Rating, Template, TemplateVisibility, Update as TemplateUpdate},
    user::User,
};
use crate::core::ports::repository::{
    ActivityCommon, Common, FieldCommon, FormCommon, GdprCommon, HierarchyCommon, Manager, MemberCommon, OrganisationCommon, SectionCommon, SettingsCommon, Store, SubmissionCommon,
    SubmissionFieldCommon, TemplateCommon, TxStore, UserCommon,
};
use crate::error::Error;

#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    next_id: i32,
    pub users: BTreeMap<i32, User>,
    pub forms: BTreeMap<i32, Form>,
    pub settings: BTreeMap<i32, FormSettings>,
    pub sections: BTreeMap<i32, Section>,
    pub fields: BTreeMap<i32, FormField>,
    pub submissions: BTreeMap<i32, Submission>,
    pub answers: BTreeMap<i32, SubmissionField>,
    pub organisations: BTreeMap<i32, Organisation>,
    pub hierarchy: Vec<HierarchyRow>,
    pub members: Vec<Member>,
    pub templates: BTreeMap<i32, Template>,
    pub ratings: Vec<Rating>,
    pub activities: Vec<Activity>,
    pub audits: Vec<AuditLog>,
    pub consents: Vec<ConsentLog>,
    pub requests: BTreeMap<i32, AccessRequest>,
    pub policies: BTreeMap<i32, RetentionPolicy>,
}

impl MemoryState {
    fn id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

fn not_found() -> Error {
    Error::DatabaseError(sqlx::Error::RowNotFound)
}

fn page<T>(items: impl Iterator<Item = T>, pagination: Option<Pagination>) -> Vec<T> {
    match pagination {
        Some(p) => items.skip(p.offset as usize).take(p.limit as usize).collect(),
        None => items.collect(),
    }
}

fn count_by(keys: impl Iterator<Item = String>) -> Vec<(String, i64)> {
    let mut counts = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

/// Repository over shared in-memory tables. A transaction works on a private
/// copy that replaces the shared tables on commit and is dropped otherwise.
pub struct Memory {
    shared: Arc<Mutex<MemoryState>>,
    snapshot: Option<MemoryState>,
}

impl Memory {
    fn with<R>(&mut self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        match self.snapshot.as_mut() {
            Some(state) => f(state),
            None => f(&mut self.shared.lock().unwrap()),
        }
    }
}

impl FormCommon for Memory {
    async fn insert(&mut self, data: FormInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            let now = Utc::now();
            s.forms.insert(
                id,
                Form {
                    id,
                    code: data.code,
                    title: data.title,
                    description: data.description,
                    owner_kind: data.owner.kind,
                    owner_id: data.owner.id,
                    primary_color: data.primary_color,
                    secondary_color: data.secondary_color,
                    created_at: now,
                    updated_at: now,
                },
            );
            id
        }))
    }

    async fn update(&mut self, id: i32, data: FormUpdate) -> Result<(), Error> {
        self.with(|s| {
            let form = s.forms.get_mut(&id).ok_or_else(not_found)?;
            form.title = data.title;
            form.description = data.description;
            form.primary_color = data.primary_color;
            form.secondary_color = data.secondary_color;
            form.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn get(&mut self, id: i32) -> Result<Form, Error> {
        self.with(|s| s.forms.get(&id).cloned().ok_or_else(not_found))
    }

    async fn get_by_code(&mut self, code: Uuid) -> Result<Form, Error> {
        self.with(|s| s.forms.values().find(|f| f.code == code).cloned().ok_or_else(not_found))
    }

    async fn query(&mut self, query: &FormQuery, pagination: Option<Pagination>) -> Result<Vec<Form>, Error> {
        Ok(self.with(|s| {
            let forms = s.forms.values().rev().filter(|f| query.owner_eq.map_or(true, |o| f.owner() == o)).cloned();
            page(forms, pagination)
        }))
    }

    async fn count(&mut self, query: &FormQuery) -> Result<i64, Error> {
        Ok(self.with(|s| s.forms.values().filter(|f| query.owner_eq.map_or(true, |o| f.owner() == o)).count() as i64))
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        self.with(|s| {
            s.forms.remove(&id).ok_or_else(not_found)?;
            s.settings.remove(&id);
            s.sections.retain(|_, v| v.form_id != id);
            s.fields.retain(|_, v| v.form_id != id);
            let submissions: Vec<i32> = s.submissions.values().filter(|v| v.form_id == id).map(|v| v.id).collect();
            s.answers.retain(|_, v| !submissions.contains(&v.submission_id));
            s.submissions.retain(|_, v| v.form_id != id);
            Ok(())
        })
    }
}

impl SettingsCommon for Memory {
    async fn get(&mut self, form_id: i32) -> Result<Option<FormSettings>, Error> {
        Ok(self.with(|s| s.settings.get(&form_id).cloned()))
    }

    async fn upsert(&mut self, settings: &FormSettings) -> Result<(), Error> {
        self.with(|s| s.settings.insert(settings.form_id, settings.clone()));
        Ok(())
    }
}

impl SectionCommon for Memory {
    async fn insert(&mut self, data: SectionInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.sections.insert(
                id,
                Section {
                    id,
                    form_id: data.form_id,
                    title: data.title,
                    description: data.description,
                    section_order: data.section_order,
                },
            );
            id
        }))
    }

    async fn update(&mut self, id: i32, data: SectionInsert) -> Result<(), Error> {
        self.with(|s| {
            let section = s.sections.get_mut(&id).filter(|v| v.form_id == data.form_id).ok_or_else(not_found)?;
            section.title = data.title;
            section.description = data.description;
            section.section_order = data.section_order;
            Ok(())
        })
    }

    async fn query(&mut self, form_id: i32) -> Result<Vec<Section>, Error> {
        Ok(self.with(|s| s.sections.values().filter(|v| v.form_id == form_id).cloned().collect()))
    }

    async fn delete_except(&mut self, form_id: i32, keep: &[i32]) -> Result<u64, Error> {
        Ok(self.with(|s| {
            let removed: Vec<i32> = s.sections.values().filter(|v| v.form_id == form_id && !keep.contains(&v.id)).map(|v| v.id).collect();
            s.sections.retain(|id, _| !removed.contains(id));
            let fields: Vec<i32> = s.fields.values().filter(|f| removed.contains(&f.section_id)).map(|f| f.id).collect();
            s.fields.retain(|id, _| !fields.contains(id));
            s.answers.retain(|_, a| !fields.contains(&a.form_field_id));
            removed.len() as u64
        }))
    }
}

impl FieldCommon for Memory {
    async fn insert(&mut self, data: FieldInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.fields.insert(
                id,
                FormField {
                    id,
                    form_id: data.form_id,
                    section_id: data.section_id,
                    label: data.label,
                    field_type: data.field_type,
                    options: data.options,
                    required: data.required,
                    field_order: data.field_order,
                },
            );
            id
        }))
    }

    async fn update(&mut self, id: i32, data: FieldInsert) -> Result<(), Error> {
        self.with(|s| {
            let field = s.fields.get_mut(&id).filter(|v| v.form_id == data.form_id).ok_or_else(not_found)?;
            field.section_id = data.section_id;
            field.label = data.label;
            field.field_type = data.field_type;
            field.options = data.options;
            field.required = data.required;
            field.field_order = data.field_order;
            Ok(())
        })
    }

    async fn query(&mut self, form_id: i32) -> Result<Vec<FormField>, Error> {
        Ok(self.with(|s| s.fields.values().filter(|v| v.form_id == form_id).cloned().collect()))
    }

    async fn delete_except(&mut self, form_id: i32, keep: &[i32]) -> Result<u64, Error> {
        Ok(self.with(|s| {
            let removed: Vec<i32> = s.fields.values().filter(|v| v.form_id == form_id && !keep.contains(&v.id)).map(|v| v.id).collect();
            s.fields.retain(|id, _| !removed.contains(id));
            s.answers.retain(|_, a| !removed.contains(&a.form_field_id));
            removed.len() as u64
        }))
    }
}

fn submission_matches(s: &Submission, query: &SubmissionQuery) -> bool {
    query.form_id_eq.map_or(true, |id| s.form_id == id) && query.user_id_eq.map_or(true, |id| s.user_id == Some(id)) && !(query.exclude_drafts && s.is_draft())
}

impl SubmissionCommon for Memory {
    async fn insert(&mut self, data: SubmissionInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            let now = Utc::now();
            s.submissions.insert(
                id,
                Submission {
                    id,
                    code: data.code,
                    form_id: data.form_id,
                    user_id: data.user_id,
                    email: None,
                    guest_name: None,
                    status: data.status,
                    retention_until: data.retention_until,
                    created_at: now,
                    updated_at: now,
                },
            );
            id
        }))
    }

    async fn update(&mut self, id: i32, data: SubmissionUpdate) -> Result<(), Error> {
        self.with(|s| {
            let submission = s.submissions.get_mut(&id).ok_or_else(not_found)?;
            submission.email = data.email;
            submission.guest_name = data.guest_name;
            submission.status = data.status;
            submission.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn set_status(&mut self, id: i32, status: SubmissionStatus) -> Result<(), Error> {
        self.with(|s| {
            let submission = s.submissions.get_mut(&id).ok_or_else(not_found)?;
            submission.status = status;
            submission.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn get(&mut self, id: i32) -> Result<Submission, Error> {
        self.with(|s| s.submissions.get(&id).cloned().ok_or_else(not_found))
    }

    async fn get_by_code(&mut self, code: Uuid) -> Result<Submission, Error> {
        self.with(|s| s.submissions.values().find(|v| v.code == code).cloned().ok_or_else(not_found))
    }

    async fn query(&mut self, query: &SubmissionQuery, pagination: Option<Pagination>) -> Result<Vec<Submission>, Error> {
        Ok(self.with(|s| page(s.submissions.values().rev().filter(|v| submission_matches(v, query)).cloned(), pagination)))
    }

    async fn count(&mut self, query: &SubmissionQuery) -> Result<i64, Error> {
        Ok(self.with(|s| s.submissions.values().filter(|v| submission_matches(v, query)).count() as i64))
    }

    async fn email_taken(&mut self, form_id: i32, email: &str, exclude_id: i32) -> Result<bool, Error> {
        Ok(self.with(|s| {
            s.submissions.values().any(|v| {
                v.form_id == form_id && v.id != exclude_id && !v.is_draft() && v.email.as_deref().map_or(false, |e| e.to_lowercase() == email.to_lowercase())
            })
        }))
    }

    async fn expired(&mut self, before: DateTime<Utc>) -> Result<Vec<Submission>, Error> {
        Ok(self.with(|s| s.submissions.values().filter(|v| v.retention_until.map_or(false, |r| r < before)).cloned().collect()))
    }

    async fn delete(&mut self, ids: &[i32]) -> Result<u64, Error> {
        Ok(self.with(|s| {
            let before = s.submissions.len();
            s.submissions.retain(|id, _| !ids.contains(id));
            (before - s.submissions.len()) as u64
        }))
    }
}

impl SubmissionFieldCommon for Memory {
    async fn bulk_insert(&mut self, answers: Vec<AnswerInsert>) -> Result<(), Error> {
        self.with(|s| {
            for a in answers {
                let id = s.id();
                s.answers.insert(
                    id,
                    SubmissionField {
                        id,
                        submission_id: a.submission_id,
                        form_field_id: a.form_field_id,
                        answer: a.answer.map(Json),
                    },
                );
            }
        });
        Ok(())
    }

    async fn query(&mut self, submission_id: i32) -> Result<Vec<SubmissionField>, Error> {
        Ok(self.with(|s| s.answers.values().filter(|a| a.submission_id == submission_id).cloned().collect()))
    }

    async fn upsert(&mut self, answer: AnswerInsert) -> Result<(), Error> {
        self.with(|s| {
            let existing = s
                .answers
                .values_mut()
                .find(|a| a.submission_id == answer.submission_id && a.form_field_id == answer.form_field_id);
            match existing {
                Some(a) => a.answer = answer.answer.map(Json),
                None => {
                    let id = s.id();
                    s.answers.insert(
                        id,
                        SubmissionField {
                            id,
                            submission_id: answer.submission_id,
                            form_field_id: answer.form_field_id,
                            answer: answer.answer.map(Json),
                        },
                    );
                }
            }
        });
        Ok(())
    }

    async fn delete_by_submissions(&mut self, submission_ids: &[i32]) -> Result<u64, Error> {
        Ok(self.with(|s| {
            let before = s.answers.len();
            s.answers.retain(|_, a| !submission_ids.contains(&a.submission_id));
            (before - s.answers.len()) as u64
        }))
    }
}

impl OrganisationCommon for Memory {
    async fn insert(&mut self, data: OrganisationInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            let now = Utc::now();
            s.organisations.insert(
                id,
                Organisation {
                    id,
                    name: data.name,
                    slug: data.slug,
                    short_name: data.short_name,
                    owner_id: data.owner_id,
                    parent_id: data.parent_id,
                    org_type: data.org_type,
                    allow_member_form_creation: true,
                    require_form_approval: false,
                    created_at: now,
                    updated_at: now,
                },
            );
            id
        }))
    }

    async fn update(&mut self, id: i32, data: OrganisationUpdate) -> Result<(), Error> {
        self.with(|s| {
            let org = s.organisations.get_mut(&id).ok_or_else(not_found)?;
            org.name = data.name;
            org.slug = data.slug;
            org.short_name = data.short_name;
            org.parent_id = data.parent_id;
            org.org_type = data.org_type;
            org.allow_member_form_creation = data.allow_member_form_creation;
            org.require_form_approval = data.require_form_approval;
            org.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn get(&mut self, id: i32) -> Result<Organisation, Error> {
        self.with(|s| s.organisations.get(&id).cloned().ok_or_else(not_found))
    }

    async fn query(&mut self, query: &OrganisationQuery) -> Result<Vec<Organisation>, Error> {
        Ok(self.with(|s| {
            s.organisations
                .values()
                .filter(|o| query.parent_id_eq.map_or(true, |p| o.parent_id == Some(p)))
                .filter(|o| {
                    query
                        .member_id
                        .map_or(true, |uid| s.members.iter().any(|m| m.organisation_id == o.id && m.user_id == uid))
                })
                .cloned()
                .collect()
        }))
    }

    async fn slug_exists(&mut self, slug: &str, exclude_id: Option<i32>) -> Result<bool, Error> {
        Ok(self.with(|s| s.organisations.values().any(|o| o.slug == slug && Some(o.id) != exclude_id)))
    }

    async fn set_owner(&mut self, id: i32, owner_id: i32) -> Result<(), Error> {
        self.with(|s| {
            let org = s.organisations.get_mut(&id).ok_or_else(not_found)?;
            org.owner_id = owner_id;
            Ok(())
        })
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        self.with(|s| {
            s.organisations.remove(&id).ok_or_else(not_found)?;
            s.hierarchy.retain(|r| r.ancestor_id != id && r.descendant_id != id);
            s.members.retain(|m| m.organisation_id != id);
            Ok(())
        })
    }
}

fn related(s: &MemoryState, rows: Vec<HierarchyRow>, pick: impl Fn(&HierarchyRow) -> i32) -> Vec<Related> {
    let mut rows = rows;
    rows.sort_by_key(|r| r.depth);
    rows.iter()
        .filter_map(|r| {
            s.organisations.get(&pick(r)).map(|o| Related {
                organisation: o.clone(),
                depth: r.depth,
            })
        })
        .collect()
}

impl HierarchyCommon for Memory {
    async fn ancestor_rows(&mut self, descendant_id: i32) -> Result<Vec<HierarchyRow>, Error> {
        Ok(self.with(|s| s.hierarchy.iter().filter(|r| r.descendant_id == descendant_id).copied().collect()))
    }

    async fn delete_rows(&mut self, descendant_id: i32) -> Result<(), Error> {
        self.with(|s| s.hierarchy.retain(|r| r.descendant_id != descendant_id));
        Ok(())
    }

    async fn insert_rows(&mut self, rows: &[HierarchyRow]) -> Result<(), Error> {
        self.with(|s| s.hierarchy.extend_from_slice(rows));
        Ok(())
    }

    async fn ancestors(&mut self, id: i32) -> Result<Vec<Related>, Error> {
        Ok(self.with(|s| {
            let rows = s.hierarchy.iter().filter(|r| r.descendant_id == id && r.depth > 0).copied().collect();
            related(s, rows, |r| r.ancestor_id)
        }))
    }

    async fn descendants(&mut self, id: i32) -> Result<Vec<Related>, Error> {
        Ok(self.with(|s| {
            let rows = s.hierarchy.iter().filter(|r| r.ancestor_id == id && r.depth > 0).copied().collect();
            related(s, rows, |r| r.descendant_id)
        }))
    }

    async fn is_descendant(&mut self, ancestor_id: i32, descendant_id: i32) -> Result<bool, Error> {
        Ok(self.with(|s| s.hierarchy.iter().any(|r| r.ancestor_id == ancestor_id && r.descendant_id == descendant_id && r.depth > 0)))
    }
}

impl MemberCommon for Memory {
    async fn insert(&mut self, data: MemberInsert) -> Result<(), Error> {
        self.with(|s| {
            let now = Utc::now();
            s.members.push(Member {
                organisation_id: data.organisation_id,
                user_id: data.user_id,
                role: data.role,
                permissions: data.permissions,
                status: data.status,
                invited_by: data.invited_by,
                invited_at: Some(now),
                joined_at: (data.status == MemberStatus::Active).then_some(now),
            })
        });
        Ok(())
    }

    async fn get(&mut self, organisation_id: i32, user_id: i32) -> Result<Option<Member>, Error> {
        Ok(self.with(|s| s.members.iter().find(|m| m.organisation_id == organisation_id && m.user_id == user_id).cloned()))
    }

    async fn query(&mut self, organisation_id: i32) -> Result<Vec<MemberDetail>, Error> {
        Ok(self.with(|s| {
            s.members
                .iter()
                .filter(|m| m.organisation_id == organisation_id)
                .filter_map(|m| {
                    s.users.get(&m.user_id).map(|u| MemberDetail {
                        id: u.id,
                        name: u.name.clone(),
                        email: u.email.clone(),
                        role: m.role,
                        permissions: m.permissions.clone(),
                        status: m.status,
                        invited_at: m.invited_at,
                        joined_at: m.joined_at,
                    })
                })
                .collect()
        }))
    }

    async fn update_role(&mut self, organisation_id: i32, user_id: i32, role: Role) -> Result<(), Error> {
        self.with(|s| {
            let member = s.members.iter_mut().find(|m| m.organisation_id == organisation_id && m.user_id == user_id).ok_or_else(not_found)?;
            member.role = role;
            Ok(())
        })
    }

    async fn update_permissions(&mut self, organisation_id: i32, user_id: i32, permissions: Option<Vec<String>>) -> Result<(), Error> {
        self.with(|s| {
            let member = s.members.iter_mut().find(|m| m.organisation_id == organisation_id && m.user_id == user_id).ok_or_else(not_found)?;
            member.permissions = permissions;
            Ok(())
        })
    }

    async fn activate(&mut self, organisation_id: i32, user_id: i32) -> Result<(), Error> {
        self.with(|s| {
            let member = s.members.iter_mut().find(|m| m.organisation_id == organisation_id && m.user_id == user_id).ok_or_else(not_found)?;
            member.status = MemberStatus::Active;
            member.joined_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn delete(&mut self, organisation_id: i32, user_id: i32) -> Result<(), Error> {
        self.with(|s| s.members.retain(|m| !(m.organisation_id == organisation_id && m.user_id == user_id)));
        Ok(())
    }

    async fn organisation_ids(&mut self, user_id: i32) -> Result<Vec<i32>, Error> {
        Ok(self.with(|s| {
            s.members
                .iter()
                .filter(|m| m.user_id == user_id && m.status == MemberStatus::Active)
                .map(|m| m.organisation_id)
                .collect()
        }))
    }
}

impl UserCommon for Memory {
    async fn get(&mut self, id: i32) -> Result<User, Error> {
        self.with(|s| s.users.get(&id).cloned().ok_or_else(not_found))
    }

    async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, Error> {
        Ok(self.with(|s| s.users.values().find(|u| u.email.to_lowercase() == email.to_lowercase()).cloned()))
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        self.with(|s| {
            s.users.remove(&id).ok_or_else(not_found)?;
            s.members.retain(|m| m.user_id != id);
            s.consents.retain(|c| c.user_id != id);
            s.requests.retain(|_, r| r.user_id != id);
            Ok(())
        })
    }
}

impl TemplateCommon for Memory {
    async fn insert(&mut self, data: TemplateInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            let now = Utc::now();
            s.templates.insert(
                id,
                Template {
                    id,
                    name: data.name,
                    slug: data.slug,
                    description: data.description,
                    owner_kind: data.owner.kind,
                    owner_id: data.owner.id,
                    visibility: data.visibility,
                    data: Json(data.data),
                    use_count: 0,
                    created_at: now,
                    updated_at: now,
                },
            );
            id
        }))
    }

    async fn get(&mut self, id: i32) -> Result<Template, Error> {
        self.with(|s| s.templates.get(&id).cloned().ok_or_else(not_found))
    }

    async fn query_usable(&mut self, user_id: i32, organisations: &[i32]) -> Result<Vec<Template>, Error> {
        Ok(self.with(|s| s.templates.values().filter(|t| t.can_be_used_by(user_id, organisations)).cloned().collect()))
    }

    async fn slug_exists(&mut self, slug: &str) -> Result<bool, Error> {
        Ok(self.with(|s| s.templates.values().any(|t| t.slug == slug)))
    }

    async fn increment_use_count(&mut self, id: i32) -> Result<(), Error> {
        self.with(|s| {
            let template = s.templates.get_mut(&id).ok_or_else(not_found)?;
            template.use_count += 1;
            Ok(())
        })
    }

    async fn update(&mut self, id: i32, data: TemplateUpdate) -> Result<(), Error> {
        self.with(|s| {
            let template = s.templates.get_mut(&id).ok_or_else(not_found)?;
            template.name = data.name;
            template.description = data.description;
            template.visibility = data.visibility;
            template.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn search(&mut self, user_id: i32, term: &str) -> Result<Vec<Template>, Error> {
        let term = term.to_lowercase();
        Ok(self.with(|s| {
            let mut found: Vec<Template> = s
                .templates
                .values()
                .filter(|t| t.visibility == TemplateVisibility::Public || t.is_owned_by_user(user_id))
                .filter(|t| t.name.to_lowercase().contains(&term) || t.description.as_deref().map_or(false, |d| d.to_lowercase().contains(&term)))
                .cloned()
                .collect();
            found.sort_by_key(|t| (-t.use_count, t.id));
            found
        }))
    }

    async fn upsert_rating(&mut self, template_id: i32, user_id: i32, rating: i32, review: Option<String>) -> Result<(), Error> {
        self.with(|s| {
            let now = Utc::now();
            match s.ratings.iter_mut().find(|r| r.template_id == template_id && r.user_id == user_id) {
                Some(existing) => {
                    existing.rating = rating;
                    existing.review = review;
                    existing.updated_at = now;
                }
                None => s.ratings.push(Rating {
                    template_id,
                    user_id,
                    rating,
                    review,
                    created_at: now,
                    updated_at: now,
                }),
            }
        });
        Ok(())
    }

    async fn ratings(&mut self, template_id: i32) -> Result<Vec<Rating>, Error> {
        Ok(self.with(|s| s.ratings.iter().filter(|r| r.template_id == template_id).cloned().collect()))
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        self.with(|s| {
            s.ratings.retain(|r| r.template_id != id);
            s.templates.remove(&id).map(|_| ()).ok_or_else(not_found)
        })
    }
}

impl GdprCommon for Memory {
    async fn insert_audit(&mut self, data: AuditInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.audits.push(AuditLog {
                id,
                action: data.action,
                entity_type: data.entity_type.to_owned(),
                entity_id: data.entity_id,
                user_id: data.user_id,
                actor_type: data.actor_type,
                reason: data.reason,
                data_summary: data.data_summary.map(Json),
                ip_address: data.ip_address,
                user_agent: data.user_agent,
                created_at: Utc::now(),
            });
            id
        }))
    }

    async fn insert_consent(&mut self, data: ConsentInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.consents.push(ConsentLog {
                id,
                user_id: data.user_id,
                consent_type: data.consent_type,
                given: data.given,
                version: data.version,
                ip_address: data.ip_address,
                user_agent: data.user_agent,
                created_at: Utc::now(),
            });
            id
        }))
    }

    async fn consents(&mut self, user_id: i32) -> Result<Vec<ConsentLog>, Error> {
        Ok(self.with(|s| s.consents.iter().filter(|c| c.user_id == user_id).cloned().collect()))
    }

    async fn audit_logs(&mut self, user_id: Option<i32>, pagination: Option<Pagination>) -> Result<Vec<AuditLog>, Error> {
        Ok(self.with(|s| {
            let logs = s.audits.iter().rev().filter(|a| user_id.map_or(true, |u| a.user_id == Some(u))).cloned();
            page(logs, pagination)
        }))
    }

    async fn count_audit_logs(&mut self, user_id: Option<i32>) -> Result<i64, Error> {
        Ok(self.with(|s| s.audits.iter().filter(|a| user_id.map_or(true, |u| a.user_id == Some(u))).count() as i64))
    }

    async fn touch_user_consent(&mut self, user_id: i32, consent_type: &str, given: bool) -> Result<(), Error> {
        self.with(|s| {
            let user = s.users.get_mut(&user_id).ok_or_else(not_found)?;
            let at = given.then(Utc::now);
            match consent_type {
                "gdpr" => user.consent_gdpr_at = at,
                "marketing_email" => user.consent_marketing_at = at,
                _ => {}
            }
            Ok(())
        })
    }

    async fn insert_request(&mut self, data: RequestInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.requests.insert(
                id,
                AccessRequest {
                    id,
                    user_id: data.user_id,
                    request_type: data.request_type,
                    status: RequestStatus::Pending,
                    reason: data.reason,
                    requested_at: data.requested_at,
                    deadline_at: data.deadline_at,
                    completed_at: None,
                    response_data: None,
                    download_token_hash: None,
                    token_expires_at: None,
                    rejection_reason: None,
                },
            );
            id
        }))
    }

    async fn get_request(&mut self, id: i32) -> Result<AccessRequest, Error> {
        self.with(|s| s.requests.get(&id).cloned().ok_or_else(not_found))
    }

    async fn get_request_by_token_hash(&mut self, hash: &str) -> Result<Option<AccessRequest>, Error> {
        Ok(self.with(|s| s.requests.values().find(|r| r.download_token_hash.as_deref() == Some(hash)).cloned()))
    }

    async fn update_request(&mut self, id: i32, data: RequestUpdate) -> Result<(), Error> {
        self.with(|s| {
            let request = s.requests.get_mut(&id).ok_or_else(not_found)?;
            match data {
                RequestUpdate::Complete {
                    completed_at,
                    token_hash,
                    token_expires_at,
                    response_data,
                } => {
                    request.status = RequestStatus::Completed;
                    request.completed_at = Some(completed_at);
                    request.download_token_hash = Some(token_hash);
                    request.token_expires_at = Some(token_expires_at);
                    request.response_data = Some(Json(response_data));
                }
                RequestUpdate::Reject { completed_at, reason } => {
                    request.status = RequestStatus::Rejected;
                    request.completed_at = Some(completed_at);
                    request.rejection_reason = Some(reason);
                }
            }
            Ok(())
        })
    }

    async fn pending_requests(&mut self) -> Result<Vec<AccessRequest>, Error> {
        Ok(self.with(|s| {
            let mut pending: Vec<AccessRequest> = s.requests.values().filter(|r| r.status == RequestStatus::Pending).cloned().collect();
            pending.sort_by_key(|r| (r.deadline_at, r.id));
            pending
        }))
    }

    async fn insert_policy(&mut self, data: RetentionPolicyCreate, applies_from: DateTime<Utc>) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.policies.insert(
                id,
                RetentionPolicy {
                    id,
                    name: data.name,
                    retention_days: data.retention_days,
                    description: data.description,
                    is_default: data.is_default,
                    applies_from,
                    created_at: Utc::now(),
                },
            );
            id
        }))
    }

    async fn clear_default_policy(&mut self) -> Result<(), Error> {
        self.with(|s| s.policies.values_mut().for_each(|p| p.is_default = false));
        Ok(())
    }

    async fn default_policy(&mut self) -> Result<Option<RetentionPolicy>, Error> {
        Ok(self.with(|s| s.policies.values().rev().find(|p| p.is_default).cloned()))
    }

    async fn policies(&mut self) -> Result<Vec<RetentionPolicy>, Error> {
        Ok(self.with(|s| s.policies.values().cloned().collect()))
    }

    async fn audit_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error> {
        Ok(self.with(|s| {
            count_by(
                s.audits
                    .iter()
                    .filter(|a| a.created_at >= from && a.created_at <= to)
                    .map(|a| a.action.as_str().to_owned()),
            )
        }))
    }

    async fn consent_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error> {
        Ok(self.with(|s| count_by(s.consents.iter().filter(|c| c.created_at >= from && c.created_at <= to).map(|c| c.consent_type.clone()))))
    }

    async fn request_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error> {
        Ok(self.with(|s| {
            count_by(
                s.requests
                    .values()
                    .filter(|r| r.requested_at >= from && r.requested_at <= to)
                    .map(|r| r.status.as_str().to_owned()),
            )
        }))
    }

    async fn overdue_requests(&mut self, now: DateTime<Utc>) -> Result<i64, Error> {
        Ok(self.with(|s| s.requests.values().filter(|r| r.is_overdue(now)).count() as i64))
    }
}

fn activity_matches(activity: &Activity, query: &ActivityQuery) -> bool {
    query.subject_type_eq.map_or(true, |t| activity.subject_type == t)
        && query.subject_id_eq.map_or(true, |id| activity.subject_id == id)
        && query.causer_id_eq.map_or(true, |id| activity.causer_id == Some(id))
}

impl ActivityCommon for Memory {
    async fn insert(&mut self, data: ActivityInsert) -> Result<i32, Error> {
        Ok(self.with(|s| {
            let id = s.id();
            s.activities.push(Activity {
                id,
                log_name: data.log_name.to_owned(),
                subject_type: data.subject_type.to_owned(),
                subject_id: data.subject_id,
                event: data.event.as_str().to_owned(),
                causer_id: data.causer_id,
                properties: Json(data.properties),
                created_at: Utc::now(),
            });
            id
        }))
    }

    async fn query(&mut self, query: &ActivityQuery, pagination: Option<Pagination>) -> Result<Vec<Activity>, Error> {
        Ok(self.with(|s| page(s.activities.iter().rev().filter(|a| activity_matches(a, query)).cloned(), pagination)))
    }

    async fn count(&mut self, query: &ActivityQuery) -> Result<i64, Error> {
        Ok(self.with(|s| s.activities.iter().filter(|a| activity_matches(a, query)).count() as i64))
    }

    async fn forget_causer(&mut self, causer_id: i32) -> Result<u64, Error> {
        Ok(self.with(|s| {
            let mut n = 0;
            for activity in s.activities.iter_mut().filter(|a| a.causer_id == Some(causer_id)) {
                activity.causer_id = None;
                n += 1;
            }
            n
        }))
    }
}

impl Common for Memory {}

impl Store for Memory {}

impl TxStore for Memory {
    async fn commit(mut self) -> Result<(), Error> {
        if let Some(state) = self.snapshot.take() {
            *self.shared.lock().unwrap() = state;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryManager {
    shared: Arc<Mutex<MemoryState>>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MemoryState {
        self.shared.lock().unwrap().clone()
    }

    pub fn add_user(&self, name: &str, email: &str, is_admin: bool) -> i32 {
        let mut state = self.shared.lock().unwrap();
        let id = state.id();
        let now = Utc::now();
        state.users.insert(
            id,
            User {
                id,
                name: name.to_owned(),
                email: email.to_owned(),
                is_admin,
                consent_gdpr_at: None,
                consent_marketing_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }
}

impl Manager for MemoryManager {
    type Store = Memory;
    type Tx = Memory;

    async fn db(&self) -> Result<Memory, Error> {
        Ok(Memory {
            shared: self.shared.clone(),
            snapshot: None,
        })
    }

    async fn tx(&self) -> Result<Memory, Error> {
        let snapshot = self.state();
        Ok(Memory {
            shared: self.shared.clone(),
            snapshot: Some(snapshot),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_tx_is_discarded() {
        let manager = MemoryManager::new();
        let uid = manager.add_user("Ada", "ada@example.com", false);
        let mut tx = manager.tx().await.unwrap();
        UserCommon::delete(&mut tx, uid).await.unwrap();
        drop(tx);
        assert!(manager.state().users.contains_key(&uid));

        let mut tx = manager.tx().await.unwrap();
        UserCommon::delete(&mut tx, uid).await.unwrap();
        tx.commit().await.unwrap();
        assert!(!manager.state().users.contains_key(&uid));
    }

    #[tokio::test]
    async fn test_email_lookup_folds_non_ascii_case() {
        let manager = MemoryManager::new();
        let uid = manager.add_user("Éva", "ÉVA@example.com", false);
        let mut db = manager.db().await.unwrap();
        let found = UserCommon::get_by_email(&mut db, "éva@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(uid));
    }
}
