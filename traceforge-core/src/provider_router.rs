use crate::config::ProviderEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Gemini => "gemini",
            ProviderType::Ollama => "ollama",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderType::OpenAi),
            "anthropic" => Some(ProviderType::Anthropic),
            "gemini" => Some(ProviderType::Gemini),
            "ollama" => Some(ProviderType::Ollama),
            _ => None,
        }
    }

    /// Built-in fallback prefix table (§4.10 step 3). Prefix tables are not
    /// overlapping across types.
    fn prefixes(&self) -> &'static [&'static str] {
        match self {
            ProviderType::Anthropic => &["claude"],
            ProviderType::Gemini => &["gemini"],
            ProviderType::Ollama => &["llama", "mistral", "codellama", "phi", "vicuna"],
            ProviderType::OpenAi => &[],
        }
    }
}

/// Result of selecting a provider for a request: the adapter type to use,
/// plus the configured entry if one was matched (carries base_url/api key
/// env var overrides).
#[derive(Debug, Clone)]
pub struct SelectedProvider {
    pub provider_type: ProviderType,
    pub entry: Option<ProviderEntry>,
}

/// Select a provider for `model` given the configured provider list,
/// following the three-step procedure in §4.10:
/// 1. a configured, enabled provider whose type's prefix set matches;
/// 2. else a configured provider marked `default`;
/// 3. else the built-in fallback table, defaulting to OpenAI.
pub fn select_provider(model: &str, providers: &[ProviderEntry]) -> SelectedProvider {
    let model_lower = model.to_ascii_lowercase();

    for entry in providers.iter().filter(|p| p.enabled) {
        let Some(ptype) = ProviderType::parse(&entry.provider_type) else {
            continue;
        };
        if model_prefix_matches(&model_lower, ptype, providers) {
            return SelectedProvider {
                provider_type: ptype,
                entry: Some(entry.clone()),
            };
        }
    }

    if let Some(default_entry) = providers.iter().find(|p| p.enabled && p.default) {
        if let Some(ptype) = ProviderType::parse(&default_entry.provider_type) {
            return SelectedProvider {
                provider_type: ptype,
                entry: Some(default_entry.clone()),
            };
        }
    }

    let fallback = [
        ProviderType::Anthropic,
        ProviderType::Gemini,
        ProviderType::Ollama,
    ]
    .into_iter()
    .find(|pt| {
        pt.prefixes()
            .iter()
            .any(|prefix| model_lower.starts_with(prefix))
    })
    .unwrap_or(ProviderType::OpenAi);

    let matching_entry = providers
        .iter()
        .find(|p| p.enabled && p.provider_type.eq_ignore_ascii_case(fallback.as_str()))
        .cloned();

    SelectedProvider {
        provider_type: fallback,
        entry: matching_entry,
    }
}

/// Whether `model` (already lower-cased) matches `ptype`'s prefix set. A
/// custom `name` on a `ProviderEntry` doesn't change prefix matching — only
/// `type` does, per §4.10: "its type's prefix set matches the model".
fn model_prefix_matches(model_lower: &str, ptype: ProviderType, _providers: &[ProviderEntry]) -> bool {
    if ptype == ProviderType::OpenAi {
        // OpenAI has no reserved prefix set of its own in the fallback table;
        // a configured OpenAI provider only matches via its own model names
        // (gpt*, o1*, o3*, text-*) which is the common case operators set up.
        return ["gpt", "o1", "o3", "text-", "chatgpt"]
            .iter()
            .any(|p| model_lower.starts_with(p));
    }
    ptype
        .prefixes()
        .iter()
        .any(|prefix| model_lower.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ty: &str, name: &str, enabled: bool, default: bool) -> ProviderEntry {
        ProviderEntry {
            provider_type: ty.to_string(),
            name: name.to_string(),
            base_url: format!("https://{name}.example.com"),
            api_key_env_var: None,
            enabled,
            default,
        }
    }

    #[test]
    fn no_providers_configured_falls_back_by_prefix() {
        let sel = select_provider("claude-3-opus", &[]);
        assert_eq!(sel.provider_type, ProviderType::Anthropic);
        assert!(sel.entry.is_none());
    }

    #[test]
    fn unrecognized_model_falls_back_to_openai() {
        let sel = select_provider("some-custom-model", &[]);
        assert_eq!(sel.provider_type, ProviderType::OpenAi);
    }

    #[test]
    fn ollama_prefix_family_is_recognized() {
        for m in ["llama3", "mistral-7b", "codellama-13b", "phi-3", "vicuna-13b"] {
            assert_eq!(select_provider(m, &[]).provider_type, ProviderType::Ollama, "{m}");
        }
    }

    #[test]
    fn gemini_prefix_is_recognized() {
        assert_eq!(
            select_provider("gemini-1.5-pro", &[]).provider_type,
            ProviderType::Gemini
        );
    }

    #[test]
    fn configured_default_provider_wins_over_fallback_table() {
        let providers = vec![entry("gemini", "g1", true, true)];
        // "claude-x" would normally fall back to Anthropic, but since no
        // configured provider's prefix matches and a default is set, the
        // default wins per step 2.
        let sel = select_provider("claude-x", &providers);
        assert_eq!(sel.provider_type, ProviderType::Gemini);
    }

    #[test]
    fn disabled_provider_is_skipped() {
        let providers = vec![entry("anthropic", "a1", false, false)];
        let sel = select_provider("claude-3-opus", &providers);
        // Falls through to built-in fallback table since the only
        // configured Anthropic provider is disabled.
        assert_eq!(sel.provider_type, ProviderType::Anthropic);
        assert!(sel.entry.is_none());
    }

    #[test]
    fn configured_provider_prefix_match_is_preferred_first() {
        let providers = vec![entry("anthropic", "a1", true, false)];
        let sel = select_provider("claude-3-opus", &providers);
        assert_eq!(sel.provider_type, ProviderType::Anthropic);
        assert_eq!(sel.entry.unwrap().name, "a1");
    }
}
