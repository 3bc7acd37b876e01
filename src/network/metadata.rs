use serde::{Deserialize, Serialize};

/// Optional annotations attached to a saved model.
/// All fields are Option<> so hand-edited or older model files deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelMetadata {
    pub description: Option<String>,
    /// Human-readable class names, index-aligned with the head outputs.
    pub class_labels: Option<Vec<String>>,
    /// Epochs completed before the run stopped.
    pub epochs_trained: Option<usize>,
    /// Mean training loss of the last completed epoch.
    pub final_loss: Option<f64>,
    /// Why training ended (`"epoch budget"` or `"early stop"`).
    pub stop_reason: Option<String>,
}
