pub mod onnx_face_analyzer;
pub mod replay_face_analyzer;
