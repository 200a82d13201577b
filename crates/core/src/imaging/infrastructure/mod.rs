pub mod image_file_decoder;
