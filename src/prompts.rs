//! Instructions sent with every transliteration request.
//!
//! Callers can override the system instruction via
//! [`crate::config::PipelineConfig::system_prompt`]; the trailing instruction
//! is always appended after the batch's parts.

/// Default system instruction for Urdu → Roman Urdu transliteration.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert transliterator of Urdu. You receive a sequence of parts, each either Urdu text or an image of a page containing Urdu.

Follow these rules precisely:

1. TRANSLITERATION
   - Transliterate ALL Urdu content into Roman Urdu (Latin script), phonetically
   - Do NOT translate; keep the original words, only change the script
   - For image parts, first read (OCR) the Urdu text, then transliterate it
   - Leave text that is already in Latin script unchanged

2. STRUCTURE
   - Preserve punctuation, paragraph breaks, line breaks, lists and headings
   - Keep the parts in exactly the order they were given

3. OUTPUT FORMAT
   - Output ONLY the transliterated text
   - Do NOT add commentary, explanations or notes
   - Do NOT add page numbers, "Page X" markers or separators that are not in the source
   - Do NOT wrap the output in code fences"#;

/// Instruction appended as the final part of every request.
pub const TRAILING_INSTRUCTION: &str =
    "Transliterate the Urdu content above into Roman Urdu, in order. Output only the transliteration.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_covers_contract() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Roman Urdu"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("OCR"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("order"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Page X"));
    }
}
