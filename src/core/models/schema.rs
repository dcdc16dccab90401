use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(sqlx::Type)]
#[sqlx(type_name = "form_field_type", rename_all = "kebab-case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    ShortAnswer,
    Email,
    LongAnswer,
    Checkbox,
    MultipleChoice,
    Textarea,
}

impl FieldType {
    pub fn has_options(&self) -> bool {
        matches!(self, FieldType::Checkbox | FieldType::MultipleChoice)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Section {
    pub id: i32,
    pub form_id: i32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub section_order: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FormField {
    pub id: i32,
    pub form_id: i32,
    pub section_id: i32,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub options: Vec<String>,
    pub required: bool,
    pub field_order: i32,
}

#[derive(Debug, Serialize)]
pub struct SectionWithFields {
    #[serde(flatten)]
    pub section: Section,
    pub fields: Vec<FormField>,
}

/// Nests fields under their sections, both ordered by their order column.
pub fn group_sections(sections: Vec<Section>, fields: Vec<FormField>) -> Vec<SectionWithFields> {
    let mut by_section = fields.into_iter().into_group_map_by(|f| f.section_id);
    sections
        .into_iter()
        .sorted_by_key(|s| (s.section_order, s.id))
        .map(|section| {
            let fields = by_section
                .remove(&section.id)
                .unwrap_or_default()
                .into_iter()
                .sorted_by_key(|f| (f.field_order, f.id))
                .collect();
            SectionWithFields { section, fields }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FieldSave {
    pub id: Option<i32>,
    #[validate(length(min = 1, max = 255))]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub options: Vec<String>,
    pub required: bool,
    #[validate(range(min = 0))]
    pub field_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SectionSave {
    pub id: Option<i32>,
    #[validate(length(max = 500))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub section_order: i32,
    #[validate(nested)]
    pub fields: Vec<FieldSave>,
}

/// Whole-form schema as sent by the builder and stored in templates.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchemaSave {
    #[validate(length(min = 1), nested)]
    pub sections: Vec<SectionSave>,
}

impl SchemaSave {
    pub fn from_sections(sections: Vec<SectionWithFields>) -> Self {
        Self {
            sections: sections
                .into_iter()
                .map(|s| SectionSave {
                    id: None,
                    title: s.section.title,
                    description: s.section.description,
                    section_order: s.section.section_order,
                    fields: s
                        .fields
                        .into_iter()
                        .map(|f| FieldSave {
                            id: None,
                            label: f.label,
                            field_type: f.field_type,
                            options: f.options,
                            required: f.required,
                            field_order: f.field_order,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn without_ids(mut self) -> Self {
        for section in self.sections.iter_mut() {
            section.id = None;
            for field in section.fields.iter_mut() {
                field.id = None;
            }
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct SectionInsert {
    pub form_id: i32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub section_order: i32,
}

#[derive(Debug, Clone)]
pub struct FieldInsert {
    pub form_id: i32,
    pub section_id: i32,
    pub label: String,
    pub field_type: FieldType,
    pub options: Vec<String>,
    pub required: bool,
    pub field_order: i32,
}
