pub const DEFAULT_MODEL: &str = "openrouter/free";

/// Built-in model choices offered by the picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelEntry {
    pub name: &'static str,
    pub id: &'static str,
}

pub const CATALOG: &[ModelEntry] = &[
    ModelEntry {
        name: "OpenRouter: Auto (Free)",
        id: "openrouter/free",
    },
    ModelEntry {
        name: "Aurora Alpha",
        id: "openrouter/aurora-alpha",
    },
    ModelEntry {
        name: "StepFun: Step 3.5 Flash",
        id: "stepfun/step-3.5-flash:free",
    },
    ModelEntry {
        name: "Arcee AI: Trinity Large Preview",
        id: "arcee-ai/trinity-large-preview:free",
    },
];

/// Map a display name to its model id. Anything not in the catalog is taken
/// to already be an id and is returned unchanged.
pub fn resolve(name_or_id: &str) -> &str {
    CATALOG
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name_or_id))
        .map(|entry| entry.id)
        .unwrap_or(name_or_id)
}

pub fn display_name(id: &str) -> &str {
    CATALOG
        .iter()
        .find(|entry| entry.id == id)
        .map(|entry| entry.name)
        .unwrap_or(id)
}
