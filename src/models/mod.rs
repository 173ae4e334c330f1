pub mod feature_extractor;
pub mod model_info;
