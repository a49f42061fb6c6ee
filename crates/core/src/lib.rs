pub mod shared {
    pub mod bounding_box;
    pub mod constants;
    pub mod frame;
    pub mod math;
    pub mod model_resolver;
    pub mod settings;
}

pub mod source {
    pub mod domain {
        pub mod frame_source;
    }
    pub mod infrastructure;
}

pub mod detection {
    pub mod domain {
        pub mod detection_adapter;
        pub mod detection_options;
        pub mod face_analyzer;
        pub mod face_landmarks;
        pub mod face_observation;
    }
    pub mod infrastructure;
}

pub mod classification {
    pub mod domain {
        pub mod classification;
        pub mod classifier;
        pub mod face_crop;
        pub mod response_shape;
    }
    pub mod infrastructure;
}

pub mod fusion {
    pub mod fusion_engine;
    pub mod region_matcher;
    pub mod tracked_region;
}

pub mod overlay {
    pub mod domain {
        pub mod frame_presenter;
        pub mod overlay_renderer;
        pub mod surface;
    }
    pub mod infrastructure;
}

pub mod ledger {
    pub mod prediction_ledger;
    pub mod prediction_record;
    pub mod submission_client;
}

pub mod pipeline {
    pub mod fps_meter;
    pub mod monitoring_pipeline;
    pub mod pipeline_logger;
}
