pub mod ffmpeg_encoder_sink;
