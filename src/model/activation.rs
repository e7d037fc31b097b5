use alloc::string::ToString;
use core::{fmt, str::FromStr};

use burn::tensor::{activation, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Pointwise nonlinearity applied at the end of a convolution block.
///
/// Serialized by its lowercase name, e.g. `"relu"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Gelu,
    Silu,
    /// Normalized exponential over dim 1 (channels or features).
    Softmax,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(input),
            Activation::Sigmoid => activation::sigmoid(input),
            Activation::Tanh => activation::tanh(input),
            Activation::Gelu => activation::gelu(input),
            Activation::Silu => activation::silu(input),
            Activation::Softmax => activation::softmax(input, 1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Gelu => "gelu",
            Activation::Silu => "silu",
            Activation::Softmax => "softmax",
        }
    }
}

impl FromStr for Activation {
    type Err = ModelError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "gelu" => Ok(Activation::Gelu),
            // swish is the same function under another name
            "silu" | "swish" => Ok(Activation::Silu),
            "softmax" => Ok(Activation::Softmax),
            other => Err(ModelError::UnknownActivation(other.to_string())),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
