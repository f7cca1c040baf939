use crate::{ModelPricing, ModelTokensDetails, ModelUsage};

fn add_opt(target: &mut Option<u32>, increment: Option<u32>) {
    if let Some(increment) = increment {
        *target = Some(target.unwrap_or(0) + increment);
    }
}

impl ModelTokensDetails {
    pub fn add(&mut self, other: &Self) {
        add_opt(&mut self.text_tokens, other.text_tokens);
        add_opt(&mut self.cached_text_tokens, other.cached_text_tokens);
        add_opt(&mut self.audio_tokens, other.audio_tokens);
        add_opt(&mut self.cached_audio_tokens, other.cached_audio_tokens);
        add_opt(&mut self.image_tokens, other.image_tokens);
        add_opt(&mut self.cached_image_tokens, other.cached_image_tokens);
    }
}

impl ModelUsage {
    /// Element-wise addition, used when totalling streamed usage
    /// increments.
    pub fn add(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        if let Some(details) = &other.input_tokens_details {
            self.input_tokens_details
                .get_or_insert_with(ModelTokensDetails::default)
                .add(details);
        }
        if let Some(details) = &other.output_tokens_details {
            self.output_tokens_details
                .get_or_insert_with(ModelTokensDetails::default)
                .add(details);
        }
    }

    /// Estimated dollar cost. Token slices without a modality breakdown
    /// are billed at the text rate; cached slices fall back to the
    /// uncached rate when no cached price is listed.
    #[must_use]
    pub fn calculate_cost(&self, pricing: &ModelPricing) -> f64 {
        let input = self.input_tokens_details.as_ref();
        let output = self.output_tokens_details.as_ref();

        let input_text = input
            .and_then(|details| details.text_tokens)
            .unwrap_or(self.input_tokens);
        let input_audio = input.and_then(|details| details.audio_tokens).unwrap_or(0);
        let input_image = input.and_then(|details| details.image_tokens).unwrap_or(0);
        let cached_text = input
            .and_then(|details| details.cached_text_tokens)
            .unwrap_or(0);
        let cached_audio = input
            .and_then(|details| details.cached_audio_tokens)
            .unwrap_or(0);
        let cached_image = input
            .and_then(|details| details.cached_image_tokens)
            .unwrap_or(0);

        let output_text = output
            .and_then(|details| details.text_tokens)
            .unwrap_or(self.output_tokens);
        let output_audio = output.and_then(|details| details.audio_tokens).unwrap_or(0);
        let output_image = output.and_then(|details| details.image_tokens).unwrap_or(0);

        let text_rate = pricing.input_cost_per_text_token.unwrap_or(0.0);
        let audio_rate = pricing.input_cost_per_audio_token.unwrap_or(0.0);
        let image_rate = pricing.input_cost_per_image_token.unwrap_or(0.0);

        f64::from(input_text) * text_rate
            + f64::from(input_audio) * audio_rate
            + f64::from(input_image) * image_rate
            + f64::from(cached_text) * pricing.input_cost_per_cached_text_token.unwrap_or(text_rate)
            + f64::from(cached_audio)
                * pricing
                    .input_cost_per_cached_audio_token
                    .unwrap_or(audio_rate)
            + f64::from(cached_image)
                * pricing
                    .input_cost_per_cached_image_token
                    .unwrap_or(image_rate)
            + f64::from(output_text) * pricing.output_cost_per_text_token.unwrap_or(0.0)
            + f64::from(output_audio) * pricing.output_cost_per_audio_token.unwrap_or(0.0)
            + f64::from(output_image) * pricing.output_cost_per_image_token.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelUsage;

    #[test]
    fn add_totals_top_level_and_details() {
        let mut total = ModelUsage {
            input_tokens: 10,
            output_tokens: 2,
            input_tokens_details: Some(ModelTokensDetails {
                text_tokens: Some(10),
                ..Default::default()
            }),
            output_tokens_details: None,
        };
        total.add(&ModelUsage {
            input_tokens: 5,
            output_tokens: 3,
            input_tokens_details: Some(ModelTokensDetails {
                text_tokens: Some(4),
                audio_tokens: Some(1),
                ..Default::default()
            }),
            output_tokens_details: Some(ModelTokensDetails {
                text_tokens: Some(3),
                ..Default::default()
            }),
        });

        assert_eq!(total.input_tokens, 15);
        assert_eq!(total.output_tokens, 5);
        let input_details = total.input_tokens_details.unwrap();
        assert_eq!(input_details.text_tokens, Some(14));
        assert_eq!(input_details.audio_tokens, Some(1));
        assert_eq!(total.output_tokens_details.unwrap().text_tokens, Some(3));
    }

    #[test]
    fn cost_falls_back_to_text_rate_without_details() {
        let usage = ModelUsage {
            input_tokens: 100,
            output_tokens: 10,
            ..Default::default()
        };
        let pricing = ModelPricing {
            input_cost_per_text_token: Some(0.001),
            output_cost_per_text_token: Some(0.002),
            ..Default::default()
        };
        let cost = usage.calculate_cost(&pricing);
        assert!((cost - 0.12).abs() < 1e-9);
    }

    #[test]
    fn cached_slices_use_cached_rate_when_listed() {
        let usage = ModelUsage {
            input_tokens: 100,
            output_tokens: 0,
            input_tokens_details: Some(ModelTokensDetails {
                text_tokens: Some(80),
                cached_text_tokens: Some(20),
                ..Default::default()
            }),
            output_tokens_details: None,
        };
        let pricing = ModelPricing {
            input_cost_per_text_token: Some(0.01),
            input_cost_per_cached_text_token: Some(0.001),
            ..Default::default()
        };
        let cost = usage.calculate_cost(&pricing);
        assert!((cost - (0.8 + 0.02)).abs() < 1e-9);
    }
}
