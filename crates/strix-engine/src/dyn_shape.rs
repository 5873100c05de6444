//! Discrete shape-gear validation.
//!
//! A gear model advertises a finite set of shapes (batch sizes, image sizes,
//! or full dim tuples).  [`ShapeGearValidator`] is stateless after
//! construction: it holds the gear sets and the data inputs' template shapes
//! and layouts, and checks candidate shapes against them before the engine
//! commits a gear selection to the runtime.

use strix_core::{
    error::{EngineError, Result},
    types::{has_unresolved_dim, TensorFormat, IMAGE_RANK},
    GearSets,
};

pub struct ShapeGearValidator {
    gears: GearSets,
    /// Template shapes of the data inputs, selector excluded.
    input_shapes: Vec<Vec<i64>>,
    input_formats: Vec<TensorFormat>,
    /// First data input carrying an unresolved dim; the one the gear
    /// selection resolves.
    dynamic_input: usize,
}

impl ShapeGearValidator {
    pub fn new(
        gears: GearSets,
        input_shapes: Vec<Vec<i64>>,
        input_formats: Vec<TensorFormat>,
    ) -> Result<Self> {
        if input_shapes.len() != input_formats.len() {
            return Err(EngineError::Consistency(
                "input shape and format lists disagree".into(),
            ));
        }
        let dynamic_input = input_shapes
            .iter()
            .position(|s| has_unresolved_dim(s))
            .ok_or_else(|| {
                EngineError::Shape("gear model has no input with an unresolved dim".into())
            })?;
        Ok(Self {
            gears,
            input_shapes,
            input_formats,
            dynamic_input,
        })
    }

    fn candidate<'a>(&self, shapes: &'a [Vec<i64>]) -> Result<&'a [i64]> {
        shapes.get(self.dynamic_input).map(Vec::as_slice).ok_or_else(|| {
            EngineError::Shape(format!(
                "expected {} input shapes, got {}",
                self.input_shapes.len(),
                shapes.len()
            ))
        })
    }

    /// Validates a candidate batch resize and returns the selected batch.
    ///
    /// The dynamic input's rank must match its template, every dim past the
    /// leading one must be positive and equal to the template dim unless the
    /// template leaves it unresolved, and the leading dim must be one of the
    /// advertised batch sizes.
    pub fn check_and_get_batch_size(&self, shapes: &[Vec<i64>]) -> Result<u64> {
        let candidate = self.candidate(shapes)?;
        let template = &self.input_shapes[self.dynamic_input];
        if candidate.len() != template.len() {
            return Err(EngineError::Shape(format!(
                "rank mismatch: model expects {}, got {}",
                template.len(),
                candidate.len()
            )));
        }
        for (axis, (&dim, &tpl)) in candidate.iter().zip(template).enumerate().skip(1) {
            if dim <= 0 {
                return Err(EngineError::Shape(format!(
                    "dim {dim} at axis {axis} is not positive"
                )));
            }
            if tpl >= 0 && dim != tpl {
                return Err(EngineError::Shape(format!(
                    "dim {dim} at axis {axis} conflicts with model dim {tpl}"
                )));
            }
        }
        let batch = *candidate.first().ok_or_else(|| {
            EngineError::Shape("batch resize requires a non-scalar shape".into())
        })?;
        if batch <= 0 {
            return Err(EngineError::Shape(format!(
                "batch size {batch} is not positive"
            )));
        }
        let batch = batch as u64;
        if !self.gears.batch_sizes.contains(&batch) {
            return Err(EngineError::Shape(format!(
                "batch size {batch} is not among the advertised gears {:?}",
                self.gears.batch_sizes
            )));
        }
        Ok(batch)
    }

    /// Validates a candidate image resize and returns the selected (H, W).
    pub fn check_and_get_image_size(&self, shapes: &[Vec<i64>]) -> Result<(u64, u64)> {
        let candidate = self.candidate(shapes)?;
        let template = &self.input_shapes[self.dynamic_input];
        if candidate.len() != IMAGE_RANK {
            return Err(EngineError::Shape(format!(
                "image resize requires rank {IMAGE_RANK}, got {}",
                candidate.len()
            )));
        }
        let format = self.input_formats[self.dynamic_input];
        let (h_axis, w_axis) = format.hw_axes().ok_or_else(|| {
            EngineError::Shape(format!("format {format:?} has no height/width axes"))
        })?;
        for (axis, (&dim, &tpl)) in candidate.iter().zip(template).enumerate() {
            if axis == h_axis || axis == w_axis {
                continue;
            }
            if tpl >= 0 && dim != tpl {
                return Err(EngineError::Shape(format!(
                    "dim {dim} at axis {axis} conflicts with model dim {tpl}"
                )));
            }
        }
        let (height, width) = (candidate[h_axis], candidate[w_axis]);
        if height <= 0 || width <= 0 {
            return Err(EngineError::Shape(format!(
                "image size {height}x{width} is not positive"
            )));
        }
        let pair = (height as u64, width as u64);
        if !self.gears.image_sizes.contains(&pair) {
            return Err(EngineError::Shape(format!(
                "image size {height}x{width} is not among the advertised gears {:?}",
                self.gears.image_sizes
            )));
        }
        Ok(pair)
    }

    /// Validates candidate shapes for every data input and returns the
    /// flattened dim tuple they select.
    pub fn check_and_get_dynamic_dims(&self, shapes: &[Vec<i64>]) -> Result<Vec<i64>> {
        if shapes.len() != self.input_shapes.len() {
            return Err(EngineError::Shape(format!(
                "expected {} input shapes, got {}",
                self.input_shapes.len(),
                shapes.len()
            )));
        }
        let mut tuple = Vec::new();
        for (input, (candidate, template)) in shapes.iter().zip(&self.input_shapes).enumerate() {
            if candidate.len() != template.len() {
                return Err(EngineError::Shape(format!(
                    "input {input}: rank mismatch: model expects {}, got {}",
                    template.len(),
                    candidate.len()
                )));
            }
            for (axis, (&dim, &tpl)) in candidate.iter().zip(template).enumerate() {
                if dim <= 0 {
                    return Err(EngineError::Shape(format!(
                        "input {input}: dim {dim} at axis {axis} is not positive"
                    )));
                }
                if tpl >= 0 && dim != tpl {
                    return Err(EngineError::Shape(format!(
                        "input {input}: dim {dim} at axis {axis} conflicts with model dim {tpl}"
                    )));
                }
            }
            tuple.extend_from_slice(candidate);
        }
        if !self.gears.dim_gears.iter().any(|g| *g == tuple) {
            return Err(EngineError::Shape(format!(
                "dims {tuple:?} are not among the advertised gears"
            )));
        }
        Ok(tuple)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_validator() -> ShapeGearValidator {
        ShapeGearValidator::new(
            GearSets {
                batch_sizes: vec![1, 2, 4],
                ..GearSets::default()
            },
            vec![vec![-1, 3, 8, 8]],
            vec![TensorFormat::Nchw],
        )
        .unwrap()
    }

    #[test]
    fn requires_an_unresolved_input() {
        let err = ShapeGearValidator::new(
            GearSets::default(),
            vec![vec![1, 3, 8, 8]],
            vec![TensorFormat::Nchw],
        );
        assert!(matches!(err, Err(EngineError::Shape(_))));
    }

    #[test]
    fn batch_membership() {
        let v = batch_validator();
        assert_eq!(
            v.check_and_get_batch_size(&[vec![4, 3, 8, 8]]).unwrap(),
            4
        );
        assert!(v.check_and_get_batch_size(&[vec![3, 3, 8, 8]]).is_err());
        assert!(v.check_and_get_batch_size(&[vec![0, 3, 8, 8]]).is_err());
    }

    #[test]
    fn batch_checks_constrained_dims() {
        let v = batch_validator();
        // Wrong channel count and wrong rank are both rejected.
        assert!(v.check_and_get_batch_size(&[vec![2, 4, 8, 8]]).is_err());
        assert!(v.check_and_get_batch_size(&[vec![2, 3, 8]]).is_err());
    }

    #[test]
    fn image_axes_follow_format() {
        let nhwc = ShapeGearValidator::new(
            GearSets {
                image_sizes: vec![(16, 24)],
                ..GearSets::default()
            },
            vec![vec![1, -1, -1, 3]],
            vec![TensorFormat::Nhwc],
        )
        .unwrap();
        assert_eq!(
            nhwc.check_and_get_image_size(&[vec![1, 16, 24, 3]]).unwrap(),
            (16, 24)
        );
        // Same dims read as NCHW extract different axes and miss the set.
        let nchw = ShapeGearValidator::new(
            GearSets {
                image_sizes: vec![(16, 24)],
                ..GearSets::default()
            },
            vec![vec![1, 3, -1, -1]],
            vec![TensorFormat::Nchw],
        )
        .unwrap();
        assert_eq!(
            nchw.check_and_get_image_size(&[vec![1, 3, 16, 24]]).unwrap(),
            (16, 24)
        );
        assert!(nchw.check_and_get_image_size(&[vec![1, 3, 24, 16]]).is_err());
    }

    #[test]
    fn dynamic_dims_flatten_every_input() {
        let v = ShapeGearValidator::new(
            GearSets {
                dim_gears: vec![vec![2, 8, 4], vec![4, 8, 4]],
                ..GearSets::default()
            },
            vec![vec![-1, 8], vec![4]],
            vec![TensorFormat::Nd, TensorFormat::Nd],
        )
        .unwrap();
        assert_eq!(
            v.check_and_get_dynamic_dims(&[vec![2, 8], vec![4]]).unwrap(),
            vec![2, 8, 4]
        );
        assert!(v.check_and_get_dynamic_dims(&[vec![3, 8], vec![4]]).is_err());
        assert!(v.check_and_get_dynamic_dims(&[vec![2, 9], vec![4]]).is_err());
        assert!(v.check_and_get_dynamic_dims(&[vec![2, 8]]).is_err());
    }
}
