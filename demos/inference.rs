use burn::{
    backend::NdArray,
    tensor::{Distribution, Tensor},
};
use resnet34_burn::{InputShape, ResNet34, ResNet34Config};

const NUM_CLASSES: usize = 10;
const HEIGHT: usize = 224;
const WIDTH: usize = 224;
const BATCH_SIZE: usize = 2;

pub fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Create ResNet-34
    let device = Default::default();
    let config = ResNet34Config::new(InputShape::new(HEIGHT, WIDTH, 3), NUM_CLASSES);
    let model: ResNet34<NdArray> = match config.init(&device) {
        Ok(model) => model,
        Err(err) => {
            tracing::error!(%err, "failed to build model");
            std::process::exit(1);
        }
    };

    // Random batch of channels-last images in [0, 1]
    let images = Tensor::<NdArray, 4>::random(
        [BATCH_SIZE, HEIGHT, WIDTH, 3],
        Distribution::Default,
        &device,
    );

    // Forward pass
    let probabilities = model.forward_channels_last(images);
    tracing::info!(shape = ?probabilities.dims(), "forward pass done");

    let sums = probabilities.clone().sum_dim(1);
    let (score, idx) = probabilities.max_dim_with_indices(1);

    println!("Row sums: {}", sums);
    println!("Predicted: {}\nScore: {}", idx, score);
}
