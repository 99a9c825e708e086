//! 画像バイト列の先頭マジックナンバーによる形式判定

/// 判定可能な画像形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Bmp,
    Jpeg,
    Gif,
    Tiff,
    Png,
    Unknown,
}

const BMP: &[u8] = b"BM";
const GIF: &[u8] = b"GIF";
const PNG: &[u8] = &[137, 80, 78, 71];
const TIFF_LE: &[u8] = &[73, 73, 42];
const TIFF_BE: &[u8] = &[77, 77, 42];
const JPEG: &[u8] = &[255, 216, 255, 224];
const JPEG_CANON: &[u8] = &[255, 216, 255, 225];

/// 判定順のテーブル
const SIGNATURES: [(&[u8], ImageFormat); 7] = [
    (BMP, ImageFormat::Bmp),
    (GIF, ImageFormat::Gif),
    (PNG, ImageFormat::Png),
    (TIFF_LE, ImageFormat::Tiff),
    (TIFF_BE, ImageFormat::Tiff),
    (JPEG, ImageFormat::Jpeg),
    (JPEG_CANON, ImageFormat::Jpeg),
];

/// 最長のマジックナンバー長
const MIN_HEADER_LEN: usize = 4;

impl ImageFormat {
    /// 先頭バイトから形式を判定
    ///
    /// 最長のマジックナンバーより短いバイト列は `Unknown` になります。
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() < MIN_HEADER_LEN {
            return ImageFormat::Unknown;
        }

        SIGNATURES
            .iter()
            .find(|(magic, _)| bytes.starts_with(magic))
            .map(|(_, format)| *format)
            .unwrap_or(ImageFormat::Unknown)
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImageFormat::Bmp => "bmp",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Png => "png",
            ImageFormat::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// ネットワークに渡せる画像か（JPEGとPNGのみ）
pub fn is_valid_image(bytes: &[u8]) -> bool {
    matches!(
        ImageFormat::detect(bytes),
        ImageFormat::Jpeg | ImageFormat::Png
    )
}
