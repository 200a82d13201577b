pub mod shared {
    pub mod build_error;
    pub mod build_outcome;
    pub mod canvas_size;
    pub mod constants;
    pub mod frame_source;
    pub mod progress;
    pub mod raster_image;
    pub mod timestamp;
}

pub mod imaging {
    pub mod domain {
        pub mod frame_rasterizer;
        pub mod image_decoder;
        pub mod pixel_buffer;
    }
    pub mod infrastructure;
}

pub mod encoding {
    pub mod domain {
        pub mod encoder_sink;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod build_config;
    pub mod build_observer;
    pub mod build_time_lapse_use_case;
    pub mod logging_build_observer;
    pub mod pipeline_driver;
    pub mod progress_reporter;
}
