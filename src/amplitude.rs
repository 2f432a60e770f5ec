use std::fmt::Debug;

use num_complex::Complex64;

use crate::dataset::Event;

/// A term which evaluates to a complex value for each [`Event`].
///
/// The slice passed to [`Node::calculate`] holds exactly the values of the parameters named by
/// [`Node::parameters`], in that order. A node with no parameters depends only on the event and
/// is evaluated once per event and cached by the [`Manager`](crate::manager::Manager).
pub trait Node: Sync + Send {
    fn calculate(&self, parameters: &[f64], event: &Event) -> Complex64;
    fn parameters(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A named [`Node`].
pub struct Amplitude {
    name: String,
    node: Box<dyn Node>,
}

impl Debug for Amplitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Amplitude {
    pub fn new<N: Node + 'static>(name: &str, node: N) -> Self {
        Self {
            name: name.to_string(),
            node: Box::new(node),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn parameters(&self) -> Vec<String> {
        self.node.parameters()
    }
    /// `true` if the amplitude has no free parameters.
    pub fn is_fixed(&self) -> bool {
        self.node.parameters().is_empty()
    }
    pub fn compute(&self, parameters: &[f64], event: &Event) -> Complex64 {
        self.node.calculate(parameters, event)
    }
}

/// A real-valued coefficient with a single parameter.
#[derive(Debug, Clone)]
pub struct Scalar {
    name: String,
}

impl Scalar {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Node for Scalar {
    fn calculate(&self, parameters: &[f64], _event: &Event) -> Complex64 {
        Complex64::new(parameters[0], 0.0)
    }
    fn parameters(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}

/// A complex-valued coefficient given by its real and imaginary parts.
#[derive(Debug, Clone)]
pub struct ComplexScalar {
    re: String,
    im: String,
}

impl ComplexScalar {
    pub fn new(re: &str, im: &str) -> Self {
        Self {
            re: re.to_string(),
            im: im.to_string(),
        }
    }
}

impl Node for ComplexScalar {
    fn calculate(&self, parameters: &[f64], _event: &Event) -> Complex64 {
        Complex64::new(parameters[0], parameters[1])
    }
    fn parameters(&self) -> Vec<String> {
        vec![self.re.clone(), self.im.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_read_their_parameters() {
        let event = Event::default();
        let scalar = Amplitude::new("s", Scalar::new("a"));
        assert_eq!(scalar.parameters(), ["a"]);
        assert_eq!(scalar.compute(&[2.5], &event), Complex64::new(2.5, 0.0));
        let cscalar = Amplitude::new("c", ComplexScalar::new("b re", "b im"));
        assert_eq!(cscalar.parameters(), ["b re", "b im"]);
        assert_eq!(
            cscalar.compute(&[1.0, -3.0], &event),
            Complex64::new(1.0, -3.0)
        );
        assert!(!cscalar.is_fixed());
    }
}
