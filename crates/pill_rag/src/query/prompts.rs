pub fn medicine_detail_prompt(medicine_name: &str, context: &str) -> String {
    // Contract: answer from context only, null for anything missing, fixed JSON keys.
    format!(
        r#"You are looking up reference information for a medicine.

Rules (non-negotiable):
1) Use ONLY the context provided below. Do not invent facts.
2) If a field is not supported by the context, return null for it (or [] for sideEffects).
3) Return a single JSON object and nothing else.

Return in this exact format:
{{
  "condition": "medical condition this treats",
  "instructions": "how to use the medicine",
  "sideEffects": ["list", "of", "side", "effects"]
}}

CONTEXT:
{context}
---
MEDICINE NAME: {medicine_name}
"#
    )
}

pub fn prescription_extraction_prompt() -> String {
    r#"The attached image is a photographed prescription.
Read it and return a JSON object and nothing else in the following format.
Write all numbers with Western (ASCII) digits.

{
  "name": "name of the medicine",
  "frequency_per_day": (integer),
  "dosage": (string describing the dosage),
  "duration_of_intake": (integer number of days, else null),
  "extra_information": (any extra information, string)
}
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_prompt_carries_context_and_name() {
        let p = medicine_detail_prompt("Aspirin", "Aspirin treats headache.");
        assert!(p.contains("CONTEXT:\nAspirin treats headache.\n---\nMEDICINE NAME: Aspirin"));
        assert!(p.contains("\"sideEffects\""));
        assert!(p.contains("return null"));
    }

    #[test]
    fn extraction_prompt_names_every_field() {
        let p = prescription_extraction_prompt();
        for key in [
            "\"name\"",
            "\"frequency_per_day\"",
            "\"dosage\"",
            "\"duration_of_intake\"",
            "\"extra_information\"",
        ] {
            assert!(p.contains(key), "{key}");
        }
    }
}
