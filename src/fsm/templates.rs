//! Message templates for the pre-resume conversation, keyed by
//! `(group, language)` with fallback to a default language and then to
//! whatever language happens to be available.

use std::collections::HashMap;
use std::path::Path;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `group -> language -> template string`. `followups` and `intent_answers`
/// nest one level deeper (`group -> key -> language -> template`), so those
/// two are handled separately from the flat groups in [`TemplateSet`].
pub type LanguageMap = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSet {
    pub default_language: String,
    pub intro: LanguageMap,
    pub resume_cta: LanguageMap,
    pub resume_ack: LanguageMap,
    pub not_interested_ack: LanguageMap,
    pub resume_promised_ack: LanguageMap,
    pub followups: HashMap<String, LanguageMap>,
    pub intent_answers: HashMap<String, LanguageMap>,
}

fn lang_map(pairs: &[(&str, &str)]) -> LanguageMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            intro: lang_map(&[
                (
                    "en",
                    "Hi {name}, thanks for your interest in \"{job_title}\". Before final matching, could you share your latest CV/resume? Core role focus: {core_profile_summary}.",
                ),
                (
                    "es",
                    "Hola {name}, gracias por tu interes en \"{job_title}\". Antes del matching final, puedes compartir tu CV actualizado? Foco del rol: {core_profile_summary}.",
                ),
            ]),
            resume_cta: lang_map(&[
                ("en", "Please share your CV/resume (file or link) so we can move to final verification."),
                ("es", "Comparte tu CV (archivo o link) para pasar a la verificacion final."),
            ]),
            resume_ack: lang_map(&[
                ("en", "Great, CV received. We are moving to final verification now."),
                ("es", "Perfecto, CV recibido. Pasamos a la verificacion final."),
            ]),
            not_interested_ack: lang_map(&[
                ("en", "Understood, thanks for the reply. We will not send further messages."),
                ("es", "Entendido, gracias por responder. No enviaremos mas mensajes."),
            ]),
            resume_promised_ack: lang_map(&[
                ("en", "Thanks, noted. I will wait for your CV and send one reminder if needed."),
                ("es", "Gracias, anotado. Espero tu CV y enviaremos un recordatorio si hace falta."),
            ]),
            followups: [
                (
                    "1",
                    lang_map(&[
                        ("en", "Quick follow-up on \"{job_title}\": could you share your CV/resume to continue?"),
                        ("es", "Seguimiento rapido sobre \"{job_title}\": puedes compartir tu CV para continuar?"),
                    ]),
                ),
                (
                    "2",
                    lang_map(&[
                        ("en", "Second follow-up: if you are interested, please send your CV/resume and we will fast-track."),
                        ("es", "Segundo seguimiento: si te interesa, comparte tu CV y avanzamos rapido."),
                    ]),
                ),
                (
                    "3",
                    lang_map(&[
                        ("en", "Final reminder for \"{job_title}\": send your CV/resume to proceed."),
                        ("es", "Ultimo recordatorio para \"{job_title}\": envia tu CV para continuar."),
                    ]),
                ),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            intent_answers: [
                (
                    "salary",
                    lang_map(&[
                        ("en", "Compensation depends on scope fit and seniority. If you share expectations, we can confirm range quickly."),
                        ("es", "La compensacion depende del encaje y seniority. Si compartes expectativas, confirmamos rango rapido."),
                    ]),
                ),
                (
                    "stack",
                    lang_map(&[
                        ("en", "Main stack and responsibilities are aligned with the role core profile we shared."),
                        ("es", "El stack y responsabilidades se alinean con el perfil core que compartimos."),
                    ]),
                ),
                (
                    "timeline",
                    lang_map(&[
                        ("en", "Process is active now, and we can move quickly once we receive your CV."),
                        ("es", "El proceso esta activo y podemos avanzar rapido cuando recibamos tu CV."),
                    ]),
                ),
                (
                    "send_jd_first",
                    lang_map(&[
                        ("en", "Sure, I can share role details first. To finalize screening after that, we still need your latest CV."),
                        ("es", "Claro, puedo compartir detalles primero. Para cerrar screening despues, necesitamos tu CV."),
                    ]),
                ),
                (
                    "default",
                    lang_map(&[
                        ("en", "Thanks for the message. I can clarify details and next steps."),
                        ("es", "Gracias por tu mensaje. Puedo aclarar detalles y siguientes pasos."),
                    ]),
                ),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }
}

impl TemplateSet {
    /// Loads the built-in templates, optionally merged with a JSON override
    /// file. Falls back to the built-ins on any read or parse error — a
    /// missing or malformed override must never take the conversation down.
    pub fn load(override_path: Option<&Path>) -> Self {
        let base = Self::default();
        let Some(path) = override_path else { return base };
        let Ok(contents) = std::fs::read_to_string(path) else { return base };
        let Ok(override_set) = serde_json::from_str::<TemplateSetOverride>(&contents) else { return base };
        override_set.merge_onto(base)
    }

    pub fn render(&self, group: &str, language: &str, vars: &RenderVars) -> String {
        let block = match group {
            "intro" => &self.intro,
            "resume_cta" => &self.resume_cta,
            "resume_ack" => &self.resume_ack,
            "not_interested_ack" => &self.not_interested_ack,
            "resume_promised_ack" => &self.resume_promised_ack,
            _ => return "{scope_summary}".to_string(),
        };
        let template = Self::pick_with_default(block, language, &self.default_language, "{scope_summary}");
        vars.apply(&template)
    }

    pub fn render_intent_answer(&self, intent: &str, language: &str, vars: &RenderVars) -> String {
        let block = self.intent_answers.get(intent).or_else(|| self.intent_answers.get("default"));
        let Some(block) = block else { return String::new() };
        let template = Self::pick_with_default(block, language, &self.default_language, "");
        vars.apply(&template)
    }

    pub fn render_followup(&self, followup_number: u32, max_followups: u32, language: &str, vars: &RenderVars) -> String {
        let key = followup_number.to_string();
        let block = self.followups.get(&key).or_else(|| self.followups.get(&max_followups.to_string()));
        let Some(block) = block else { return "Please share your CV/resume.".to_string() };
        let template = Self::pick_with_default(block, language, &self.default_language, "Please share your CV/resume.");
        vars.apply(&template)
    }

    fn pick_with_default(block: &LanguageMap, language: &str, default_language: &str, fallback: &str) -> String {
        if block.is_empty() {
            return fallback.to_string();
        }
        if let Some(exact) = block.get(language) {
            return exact.clone();
        }
        if let Some(default) = block.get(default_language) {
            return default.clone();
        }
        block.values().next().cloned().unwrap_or_else(|| fallback.to_string())
    }
}

pub struct RenderVars<'a> {
    pub name: &'a str,
    pub job_title: &'a str,
    pub scope_summary: &'a str,
    pub core_profile_summary: &'a str,
}

impl<'a> RenderVars<'a> {
    fn apply(&self, template: &str) -> String {
        template
            .replace("{name}", self.name)
            .replace("{job_title}", self.job_title)
            .replace("{scope_summary}", self.scope_summary)
            .replace("{core_profile_summary}", self.core_profile_summary)
    }
}

/// Partial override shape accepted from `signal_rules_path`-style config
/// files: any subset of groups, merged onto the built-in defaults rather
/// than replacing them wholesale.
#[derive(Debug, Deserialize, Default)]
struct TemplateSetOverride {
    default_language: Option<String>,
    intro: Option<LanguageMap>,
    resume_cta: Option<LanguageMap>,
    resume_ack: Option<LanguageMap>,
    not_interested_ack: Option<LanguageMap>,
    resume_promised_ack: Option<LanguageMap>,
    followups: Option<HashMap<String, LanguageMap>>,
    intent_answers: Option<HashMap<String, LanguageMap>>,
}

impl TemplateSetOverride {
    fn merge_onto(self, mut base: TemplateSet) -> TemplateSet {
        if let Some(v) = self.default_language {
            base.default_language = v;
        }
        if let Some(v) = self.intro {
            base.intro.extend(v);
        }
        if let Some(v) = self.resume_cta {
            base.resume_cta.extend(v);
        }
        if let Some(v) = self.resume_ack {
            base.resume_ack.extend(v);
        }
        if let Some(v) = self.not_interested_ack {
            base.not_interested_ack.extend(v);
        }
        if let Some(v) = self.resume_promised_ack {
            base.resume_promised_ack.extend(v);
        }
        if let Some(v) = self.followups {
            for (key, lang_block) in v {
                base.followups.entry(key).or_default().extend(lang_block);
            }
        }
        if let Some(v) = self.intent_answers {
            for (key, lang_block) in v {
                base.intent_answers.entry(key).or_default().extend(lang_block);
            }
        }
        base
    }
}

static RESUME_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s)>"]+"#).unwrap());

const RESUME_LINK_MARKERS: &[&str] = &["resume", "cv", ".pdf", ".doc", ".docx", "drive.", "dropbox", "notion."];

/// Extracts URLs from free text that look like a resume/CV link, ignoring
/// URLs that don't carry any of the recognized markers.
pub fn parse_resume_links(text: &str) -> Vec<String> {
    RESUME_LINK_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|link| {
            let lowered = link.to_lowercase();
            RESUME_LINK_MARKERS.iter().any(|marker| lowered.contains(marker))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_only_resume_like_links() {
        let text = "here's my site https://example.com/about and my cv https://drive.google.com/file/abc";
        let links = parse_resume_links(text);
        assert_eq!(links, vec!["https://drive.google.com/file/abc".to_string()]);
    }

    #[test]
    fn intro_template_renders_with_variables() {
        let templates = TemplateSet::default();
        let vars = RenderVars { name: "Alex", job_title: "Backend Engineer", scope_summary: "backend APIs", core_profile_summary: "backend APIs" };
        let rendered = templates.render("intro", "en", &vars);
        assert!(rendered.contains("Alex"));
        assert!(rendered.contains("Backend Engineer"));
    }

    #[test]
    fn missing_language_falls_back_to_default() {
        let templates = TemplateSet::default();
        let vars = RenderVars { name: "Alex", job_title: "Role", scope_summary: "scope", core_profile_summary: "scope" };
        let rendered = templates.render("intro", "fr", &vars);
        assert!(rendered.contains("thanks for your interest"));
    }
}
