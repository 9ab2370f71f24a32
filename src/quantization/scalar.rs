//! 8-bit scalar quantization with per-vector min/max.

/// One vector mapped linearly onto `0..=255` between its own min and max.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarCode {
    pub codes: Vec<u8>,
    pub min: f32,
    pub scale: f32,
}

impl ScalarCode {
    pub fn encode(vector: &[f32]) -> Self {
        let (min, max) = vector
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        if vector.is_empty() {
            return Self {
                codes: Vec::new(),
                min: 0.0,
                scale: 0.0,
            };
        }

        let range = max - min;
        // Constant vectors collapse to code 0 with the constant as the offset.
        let scale = if range > f32::EPSILON { range / 255.0 } else { 0.0 };
        let codes = vector
            .iter()
            .map(|&x| {
                if scale == 0.0 {
                    0
                } else {
                    ((x - min) / scale).round().clamp(0.0, 255.0) as u8
                }
            })
            .collect();

        Self { codes, min, scale }
    }

    /// Decoded components.
    #[inline]
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.codes
            .iter()
            .map(move |&c| self.min + f32::from(c) * self.scale)
    }

    pub fn memory_bytes(&self) -> usize {
        self.codes.len() + 2 * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes_round_trip_exactly() {
        let code = ScalarCode::encode(&[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(code.codes, vec![255, 0, 0, 0]);
        let back: Vec<f32> = code.values().collect();
        assert!((back[0] - 1.0).abs() < 1e-6);
        assert!(back[1..].iter().all(|x| x.abs() < 1e-6));
    }

    #[test]
    fn error_is_bounded_by_half_a_step() {
        let v: Vec<f32> = (0..64).map(|i| ((i * 7) as f32).cos()).collect();
        let code = ScalarCode::encode(&v);
        for (orig, back) in v.iter().zip(code.values()) {
            assert!((orig - back).abs() <= code.scale * 0.5 + 1e-6);
        }
    }

    #[test]
    fn constant_vector_decodes_to_itself() {
        let code = ScalarCode::encode(&[0.25; 8]);
        assert!(code.values().all(|x| (x - 0.25).abs() < 1e-6));
    }
}
