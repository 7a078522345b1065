use std::borrow::Cow;

/// Information about a runnable model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Identifier, also the directory name in bundle and cache locations
    pub id: Cow<'static, str>,
    pub display_name: Cow<'static, str>,
    /// Engine library the compiled model was built against
    pub model_lib: Cow<'static, str>,
    /// Remote repository for the identifier flow
    pub source_url: Option<Cow<'static, str>>,
}

/// Registry of built-in models
pub const MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: Cow::Borrowed("Qwen2-0.5B-Instruct-q0f16-MLC"),
        display_name: Cow::Borrowed("Qwen 0.5B"),
        model_lib: Cow::Borrowed("qwen3_q0f16_e63d9b1954017ab989b2bde1896a12e2"),
        source_url: Some(Cow::Borrowed(
            "https://huggingface.co/mlc-ai/Qwen2-0.5B-Instruct-q0f16-MLC",
        )),
    },
    ModelDescriptor {
        id: Cow::Borrowed("gemma-2-2b-it-q4f16_1-MLC"),
        display_name: Cow::Borrowed("Gemma 2B"),
        model_lib: Cow::Borrowed("gemma2_q4f16_1_779a95d4ef785ea159992d38fac2317f"),
        source_url: Some(Cow::Borrowed(
            "https://huggingface.co/mlc-ai/gemma-2-2b-it-q4f16_1-MLC",
        )),
    },
    ModelDescriptor {
        id: Cow::Borrowed("Phi-3.5-mini-instruct-q4f16_1-MLC"),
        display_name: Cow::Borrowed("Phi-3.5 Mini"),
        model_lib: Cow::Borrowed("phi3_q4f16_1_eba3d93dab5930b68f7296c1fd0d29ec"),
        source_url: Some(Cow::Borrowed(
            "https://huggingface.co/mlc-ai/Phi-3.5-mini-instruct-q4f16_1-MLC",
        )),
    },
];

impl ModelDescriptor {
    /// Describe a model outside the built-in registry
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        model_lib: impl Into<String>,
        source_url: Option<String>,
    ) -> Self {
        Self {
            id: Cow::Owned(id.into()),
            display_name: Cow::Owned(display_name.into()),
            model_lib: Cow::Owned(model_lib.into()),
            source_url: source_url.map(Cow::Owned),
        }
    }

    /// Find model by id
    #[must_use]
    pub fn find(id: &str) -> Option<&'static Self> {
        MODELS.iter().find(|m| m.id == id)
    }

    /// Get all model ids
    #[must_use]
    pub fn all_ids() -> Vec<&'static str> {
        MODELS
            .iter()
            .filter_map(|m| match &m.id {
                Cow::Borrowed(id) => Some(*id),
                Cow::Owned(_) => None,
            })
            .collect()
    }

    /// Find closest match using Levenshtein distance
    #[must_use]
    pub fn suggest(id: &str) -> Option<&'static str> {
        if id.is_empty() {
            return None;
        }

        Self::all_ids()
            .into_iter()
            .map(|known| (known, levenshtein_distance(id, known)))
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 2) // Only suggest if within 2 edits
            .map(|(known, _)| known)
    }
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s2_chars: Vec<char> = s2.chars().collect();
    let mut prev: Vec<usize> = (0..=s2_chars.len()).collect();

    for (i, c1) in s1.chars().enumerate() {
        let mut row = Vec::with_capacity(prev.len());
        row.push(i + 1);
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != *c2);
            row.push((prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost));
        }
        prev = row;
    }

    prev[s2_chars.len()]
}
