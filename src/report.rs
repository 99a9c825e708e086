//! コンソール出力

use crate::model::ModelMetadata;

/// 区切り線付きの見出しを表示
pub fn console_write_header(lines: &[&str]) {
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0).max(20);
    println!(" ");
    for line in lines {
        println!("{}", line);
    }
    println!("{}", "=".repeat(width));
}

/// 区切り線で囲んだブロックを表示
pub fn console_write_banner(title: &str) {
    println!("{}", "=".repeat(69));
    println!("{}", title);
    println!("{}", "=".repeat(69));
}

/// メタデータ情報を表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    let s = &metadata.feature_settings;
    println!("  学習日時: {}", metadata.trained_at);
    println!("  ラベル数: {}", metadata.num_classes());
    println!("  ラベル: {}", metadata.label_names.join(", "));
    println!("  特徴次元: {}", metadata.num_features);
    println!(
        "  画像サイズ: {}x{}, mean: {}, scale: {}",
        s.width, s.height, s.offset, s.scale
    );
    println!("  入力テンソル: {} -> 出力: {}", s.input_tensor, s.output_tensors.join(", "));
}
