use std::collections::HashSet;
use uuid::Uuid;
use validator::Validate;

use crate::core::models::schema::{group_sections, FieldInsert, SchemaSave, SectionInsert, SectionWithFields};
use crate::core::permission::{Permission, RoleGrants};
use crate::core::ports::repository::{FieldCommon, SectionCommon, Store, TxStore};
use crate::core::services::form::authorized_form;
use crate::error::{Error, FieldErrors};

fn check_options(schema: &SchemaSave) -> Result<(), Error> {
    let mut errors = FieldErrors::new();
    for (i, section) in schema.sections.iter().enumerate() {
        for (j, field) in section.fields.iter().enumerate() {
            if field.field_type.has_options() && field.options.iter().all(|o| o.trim().is_empty()) {
                errors
                    .entry(format!("sections[{}].fields[{}].options", i, j))
                    .or_default()
                    .push("choice fields need at least one option".into());
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidFields(errors))
    }
}

/// Upserts sections and fields by id and deletes the ones no longer listed.
/// Ids that do not belong to the form are inserted as new rows.
pub async fn apply_schema<S>(store: &mut S, form_id: i32, schema: &SchemaSave) -> Result<Vec<SectionWithFields>, Error>
where
    S: Store,
{
    let existing_sections: HashSet<i32> = SectionCommon::query(store, form_id).await?.into_iter().map(|s| s.id).collect();
    let existing_fields: HashSet<i32> = FieldCommon::query(store, form_id).await?.into_iter().map(|f| f.id).collect();
    let mut kept_sections = Vec::new();
    let mut kept_fields = Vec::new();
    for section in &schema.sections {
        let row = SectionInsert {
            form_id,
            title: section.title.clone(),
            description: section.description.clone(),
            section_order: section.section_order,
        };
        let section_id = match section.id.filter(|id| existing_sections.contains(id)) {
            Some(id) => {
                SectionCommon::update(store, id, row).await?;
                id
            }
            None => SectionCommon::insert(store, row).await?,
        };
        kept_sections.push(section_id);
        for field in &section.fields {
            let row = FieldInsert {
                form_id,
                section_id,
                label: field.label.clone(),
                field_type: field.field_type,
                options: if field.field_type.has_options() { field.options.clone() } else { Vec::new() },
                required: field.required,
                field_order: field.field_order,
            };
            let field_id = match field.id.filter(|id| existing_fields.contains(id)) {
                Some(id) => {
                    FieldCommon::update(store, id, row).await?;
                    id
                }
                None => FieldCommon::insert(store, row).await?,
            };
            kept_fields.push(field_id);
        }
    }
    FieldCommon::delete_except(store, form_id, &kept_fields).await?;
    SectionCommon::delete_except(store, form_id, &kept_sections).await?;
    load_schema(store, form_id).await
}

pub async fn load_schema<S>(store: &mut S, form_id: i32) -> Result<Vec<SectionWithFields>, Error>
where
    S: Store,
{
    let sections = SectionCommon::query(store, form_id).await?;
    let fields = FieldCommon::query(store, form_id).await?;
    Ok(group_sections(sections, fields))
}

pub async fn get_schema<S, G>(db: &mut S, grants: &G, user_id: i32, code: Uuid) -> Result<Vec<SectionWithFields>, Error>
where
    S: Store,
    G: RoleGrants,
{
    let form = authorized_form(db, grants, user_id, code, Permission::SubmissionsView).await?;
    load_schema(db, form.id).await
}

pub async fn save_schema<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid, schema: SchemaSave) -> Result<Vec<SectionWithFields>, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    schema.validate()?;
    check_options(&schema)?;
    let form = authorized_form(&mut tx, grants, user_id, code, Permission::FormsEdit).await?;
    let sections = apply_schema(&mut tx, form.id, &schema).await?;
    tx.commit().await?;
    Ok(sections)
}
