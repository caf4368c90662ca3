use std::path::Path;

use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, SavedModelBundle, Session, SessionOptions,
    SessionRunArgs, Tensor, DEFAULT_SERVING_SIGNATURE_DEF_KEY,
};
use tracing::info;

use crate::error::ModelError;
use crate::preprocess::InputTensor;

/// Anything that maps a preprocessed image to per-class scores.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError>;
}

/// TensorFlow-backed classifier.
///
/// Accepts either a frozen `GraphDef` file (input and output looked up by
/// operation name) or a SavedModel directory (served through its
/// `serving_default` signature).
pub struct TfClassifier {
    // keeps the graph alive alongside the session
    _graph: Graph,
    session: Session,
    input: Operation,
    input_index: i32,
    output: Operation,
    output_index: i32,
}

impl TfClassifier {
    pub fn load(path: &Path, input_op: &str, output_op: &str) -> Result<Self, ModelError> {
        if path.is_dir() {
            Self::from_saved_model(path)
        } else {
            Self::from_frozen_graph(path, input_op, output_op)
        }
    }

    pub fn from_frozen_graph(
        path: &Path,
        input_op: &str,
        output_op: &str,
    ) -> Result<Self, ModelError> {
        let model_bytes = std::fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut graph = Graph::new();
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;
        let session = Session::new(&SessionOptions::new(), &graph)?;

        let input = required_op(&graph, input_op)?;
        let output = required_op(&graph, output_op)?;

        info!(path = %path.display(), input_op, output_op, "loaded frozen graph");

        Ok(Self {
            _graph: graph,
            session,
            input,
            input_index: 0,
            output,
            output_index: 0,
        })
    }

    pub fn from_saved_model(dir: &Path) -> Result<Self, ModelError> {
        let mut graph = Graph::new();
        let bundle = SavedModelBundle::load(&SessionOptions::new(), ["serve"], &mut graph, dir)?;

        let signature = bundle
            .meta_graph_def()
            .get_signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY)?;
        let input_info = signature.inputs().values().next().ok_or_else(|| {
            ModelError::Signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY.to_string(), "input")
        })?;
        let output_info = signature.outputs().values().next().ok_or_else(|| {
            ModelError::Signature(DEFAULT_SERVING_SIGNATURE_DEF_KEY.to_string(), "output")
        })?;

        let input = required_op(&graph, &input_info.name().name)?;
        let output = required_op(&graph, &output_info.name().name)?;
        let input_index = input_info.name().index;
        let output_index = output_info.name().index;

        info!(path = %dir.display(), "loaded saved model");

        Ok(Self {
            _graph: graph,
            session: bundle.session,
            input,
            input_index,
            output,
            output_index,
        })
    }
}

fn required_op(graph: &Graph, name: &str) -> Result<Operation, ModelError> {
    graph
        .operation_by_name(name)
        .map_err(tensorflow::Status::from)?
        .ok_or_else(|| ModelError::OperationNotFound(name.to_string()))
}

impl Classifier for TfClassifier {
    fn predict(&self, input: &InputTensor) -> Result<Vec<f32>, ModelError> {
        let tensor = Tensor::<f32>::new(&input.dims()).with_values(&input.data)?;

        // Session::run is safe to call from several threads at once
        let mut args = SessionRunArgs::new();
        args.add_feed(&self.input, self.input_index, &tensor);
        let token = args.request_fetch(&self.output, self.output_index);
        self.session.run(&mut args)?;

        let output: Tensor<f32> = args.fetch(token)?;
        Ok(output.to_vec())
    }
}
