use indicatif::{ProgressBar, ProgressStyle};

pub fn single_pb(length: u64) -> ProgressBar {
    let pb = ProgressBar::new(length);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [ {bar:50} ] {pos}/{len} {msg} {spinner}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#|-");
    pb.set_style(style);
    pb
}
