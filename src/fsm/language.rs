//! Minimal heuristic language detection for inbound text — no external NLP
//! dependency, just enough to pick a reasonable template bucket.

pub fn pick_candidate_language(candidate_languages: &[String], fallback: &str) -> String {
    candidate_languages
        .iter()
        .find(|lang| !lang.trim().is_empty())
        .map(|lang| lang.trim().to_lowercase())
        .unwrap_or_else(|| fallback.to_string())
}

const RU_MARKERS: &[&str] = &["зарплат", "вилка", "удален", "стек", "собесед"];
const ES_MARKERS: &[&str] = &["salario", "remoto", "proceso", "entrevista", "stack"];
const ES_DIACRITICS: &[char] = &['¿', '¡', 'ñ', 'á', 'é', 'í', 'ó', 'ú'];

pub fn detect_language_from_text(text: &str, fallback: &str) -> String {
    let normalized = text.to_lowercase();
    if normalized.is_empty() {
        return fallback.to_string();
    }

    if normalized.chars().any(|ch| ('а'..='я').contains(&ch) || ch == 'ё') {
        return "ru".to_string();
    }
    if normalized.chars().any(|ch| ES_DIACRITICS.contains(&ch)) {
        return "es".to_string();
    }
    if RU_MARKERS.iter().any(|m| normalized.contains(m)) {
        return "ru".to_string();
    }
    if ES_MARKERS.iter().any(|m| normalized.contains(m)) {
        return "es".to_string();
    }
    fallback.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyrillic_text_detects_russian() {
        assert_eq!(detect_language_from_text("привет, какая зарплата?", "en"), "ru");
    }

    #[test]
    fn spanish_diacritics_detect_spanish() {
        assert_eq!(detect_language_from_text("¿cual es el salario?", "en"), "es");
    }

    #[test]
    fn plain_text_falls_back_to_default() {
        assert_eq!(detect_language_from_text("hello there", "en"), "en");
    }

    #[test]
    fn empty_text_falls_back_without_inspection() {
        assert_eq!(detect_language_from_text("", "en"), "en");
    }
}
