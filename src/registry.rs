//! Encoder registry and factories.
//!
//! The [`Registry`] is built once by the host: codec libraries, hardware
//! APIs and handlers are registered, then [`Registry::register_encoders`]
//! turns every usable encoder into a [`Factory`] keyed by a stable uid.
//! Hosts look factories up by uid and create sessions from them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ffenc_codec::{
    CodecInfo, CodecLibrary, CodecParameters, ColorRange, ColorSpace, Converter, MediaKind,
    PixelFormat, SampleFormat, SoftwareConverter,
};

use crate::cmdline::CodecOptions;
use crate::context::CodecContext;
use crate::error::{EncodeError, Result};
use crate::handler::Handler;
use crate::hw::HwApi;
use crate::ingest::{HardwareIngest, SoftwareIngest};
use crate::instance::EncodeInstance;
use crate::settings::{CommonSettings, Settings};

/// Identity of one registered encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecDescriptor {
    /// Stable id hosts refer to the encoder by.
    pub uid: String,
    /// Codec name in the library.
    pub codec: String,
    pub readable_name: String,
    pub media: MediaKind,
    /// Whether this descriptor takes frames as device textures.
    pub hardware: bool,
    pub info: CodecInfo,
}

impl CodecDescriptor {
    /// Descriptor of the texture-input variant of a hardware encoder.
    #[must_use]
    pub fn texture(info: CodecInfo) -> Self {
        Self {
            uid: format!("ffenc-{}", info.name),
            codec: info.name.clone(),
            readable_name: info.long_name.clone(),
            media: info.media,
            hardware: true,
            info,
        }
    }

    /// Descriptor taking frames from system memory. Hardware encoders get
    /// a `-sw` suffix to tell it apart from their texture variant.
    #[must_use]
    pub fn software(info: CodecInfo) -> Self {
        let (uid, readable_name) = if info.is_hardware() {
            (
                format!("ffenc-{}-sw", info.name),
                format!("{} (software input)", info.long_name),
            )
        } else {
            (format!("ffenc-{}", info.name), info.long_name.clone())
        };
        Self {
            uid,
            codec: info.name.clone(),
            readable_name,
            media: info.media,
            hardware: false,
            info,
        }
    }
}

/// Registry behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryConfig {
    /// Register encoders that have no handler.
    pub include_unhandled: bool,
}

/// Host video output a session is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInput {
    pub width: u32,
    pub height: u32,
    /// Framerate as (numerator, denominator).
    pub framerate: (u32, u32),
    /// Format the host renders in.
    pub format: PixelFormat,
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
}

impl VideoInput {
    /// 30 fps BT.709 partial range input of the given size and format.
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            framerate: (30, 1),
            format,
            color_space: ColorSpace::Bt709,
            color_range: ColorRange::Partial,
        }
    }

    /// Set the framerate.
    #[must_use]
    pub fn framerate(mut self, num: u32, den: u32) -> Self {
        self.framerate = (num, den);
        self
    }
}

/// Host audio output a session is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInput {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// Creates sessions of one registered encoder.
pub struct Factory {
    descriptor: CodecDescriptor,
    library: Arc<dyn CodecLibrary>,
    hw_api: Option<Arc<dyn HwApi>>,
    handler: Option<Arc<dyn Handler>>,
}

impl Factory {
    #[must_use]
    pub fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    /// Seed the common defaults and the handler's defaults.
    pub fn defaults(&self, settings: &mut Settings, hardware: bool) {
        CommonSettings::apply_defaults(settings);
        if let Some(handler) = &self.handler {
            handler.defaults(&self.descriptor.info, settings, hardware);
        }
    }

    /// Create a session fed with raw video frames.
    pub fn create_video(
        &self,
        settings: &Settings,
        input: &VideoInput,
    ) -> Result<EncodeInstance<SoftwareIngest>> {
        self.expect_media(MediaKind::Video)?;
        let common = CommonSettings::from_settings(settings)?;
        let converter = SoftwareConverter::new(input.color_space, input.color_range);
        let format = self.select_pixel_format(&common, input.format, |format| {
            converter.supports(input.format, format)
        })?;

        let parameters = self.video_parameters(&common, input, format);
        let context = CodecContext::allocate(self.library.as_ref(), &self.descriptor)?;
        let mut instance = EncodeInstance::new(
            context,
            self.descriptor.clone(),
            parameters,
            SoftwareIngest::new(Box::new(converter)),
            self.handler.clone(),
        )
        .with_idle_threshold(common.pool_idle);
        instance.configure(&self.codec_options(settings, &common)?)?;
        Ok(instance)
    }

    /// Create a session fed with raw audio frames.
    pub fn create_audio(
        &self,
        settings: &Settings,
        input: &AudioInput,
    ) -> Result<EncodeInstance<SoftwareIngest>> {
        self.expect_media(MediaKind::Audio)?;
        let common = CommonSettings::from_settings(settings)?;
        if !self.descriptor.info.supports_sample_format(input.format) {
            return Err(EncodeError::configuration(
                &self.descriptor.codec,
                format!("sample format {:?} not supported", input.format),
            ));
        }

        let parameters = CodecParameters::audio(input.sample_rate, input.channels, input.format)
            .bitrate(u64::from(common.bitrate_kbps) * 1000)
            .threads(common.threads)
            .compliance(common.compliance);
        let context = CodecContext::allocate(self.library.as_ref(), &self.descriptor)?;
        let converter = SoftwareConverter::default();
        let mut instance = EncodeInstance::new(
            context,
            self.descriptor.clone(),
            parameters,
            SoftwareIngest::new(Box::new(converter)),
            self.handler.clone(),
        )
        .with_idle_threshold(common.pool_idle);
        instance.configure(&self.codec_options(settings, &common)?)?;
        Ok(instance)
    }

    /// Create a session fed with shared device textures.
    pub fn create_texture(
        &self,
        settings: &Settings,
        input: &VideoInput,
    ) -> Result<EncodeInstance<HardwareIngest>> {
        self.expect_media(MediaKind::Video)?;
        let api = match (&self.hw_api, self.descriptor.hardware) {
            (Some(api), true) => api.as_ref(),
            _ => {
                return Err(EncodeError::configuration(
                    &self.descriptor.codec,
                    format!("{} does not take textures", self.descriptor.uid),
                ))
            }
        };
        let common = CommonSettings::from_settings(settings)?;
        // Surfaces hold the texture content as is, no conversion on this path.
        let format = self.select_pixel_format(&common, input.format, |_| false)?;

        let path = HardwareIngest::new(api, common.gpu).map_err(|source| {
            EncodeError::HardwareImportFailed {
                codec: self.descriptor.codec.clone(),
                operation: "create device",
                source,
            }
        })?;
        let parameters = self
            .video_parameters(&common, input, format)
            .hw_device(path.device());
        let context = CodecContext::allocate(self.library.as_ref(), &self.descriptor)?;
        let mut instance = EncodeInstance::new(
            context,
            self.descriptor.clone(),
            parameters,
            path,
            self.handler.clone(),
        )
        .with_idle_threshold(common.pool_idle);
        instance.configure(&self.codec_options(settings, &common)?)?;
        Ok(instance)
    }

    fn expect_media(&self, media: MediaKind) -> Result<()> {
        if self.descriptor.media == media {
            Ok(())
        } else {
            Err(EncodeError::configuration(
                &self.descriptor.codec,
                format!("{:?} session requested from a {:?} encoder", media, self.descriptor.media),
            ))
        }
    }

    /// Pick the pixel format frames are submitted in: the settings
    /// override, else the host's format if the codec takes it, else the
    /// codec's most preferred format the host format converts to.
    fn select_pixel_format(
        &self,
        common: &CommonSettings,
        host: PixelFormat,
        convertible: impl Fn(PixelFormat) -> bool,
    ) -> Result<PixelFormat> {
        let info = &self.descriptor.info;
        let selected = match common.color_format {
            Some(format) if info.supports_pixel_format(format) => format,
            Some(format) => {
                return Err(EncodeError::configuration(
                    &self.descriptor.codec,
                    format!("pixel format {:?} not supported", format),
                ))
            }
            None if info.supports_pixel_format(host) => host,
            None => info
                .pixel_formats
                .iter()
                .copied()
                .find(|&format| convertible(format))
                .ok_or_else(|| {
                    EncodeError::configuration(
                        &self.descriptor.codec,
                        format!("no supported pixel format reachable from {:?}", host),
                    )
                })?,
        };
        let selected = match &self.handler {
            Some(handler) => handler.override_pixel_format(info, selected),
            None => selected,
        };
        if selected != host && !convertible(selected) {
            return Err(EncodeError::configuration(
                &self.descriptor.codec,
                format!("cannot feed {:?} frames from {:?} input", selected, host),
            ));
        }
        Ok(selected)
    }

    fn video_parameters(
        &self,
        common: &CommonSettings,
        input: &VideoInput,
        format: PixelFormat,
    ) -> CodecParameters {
        let (num, den) = input.framerate;
        CodecParameters::video(input.width, input.height)
            .framerate(num, den)
            .pixel_format(format)
            .color(input.color_space, input.color_range)
            .bitrate(u64::from(common.bitrate_kbps) * 1000)
            .gop_size(common.keyframe_interval.gop_frames(input.framerate))
            .threads(common.threads)
            .compliance(common.compliance)
    }

    /// Handler options followed by the custom option string.
    fn codec_options(&self, settings: &Settings, common: &CommonSettings) -> Result<CodecOptions> {
        let mut options = CodecOptions::new();
        if let Some(handler) = &self.handler {
            handler.translate(&self.descriptor.info, settings, &mut options)?;
        }
        options.extend(CodecOptions::parse(&common.custom_settings));
        Ok(options)
    }
}

/// Registered libraries, hardware APIs, handlers and factories.
pub struct Registry {
    config: RegistryConfig,
    libraries: Vec<Arc<dyn CodecLibrary>>,
    hw_apis: Vec<Arc<dyn HwApi>>,
    handlers: HashMap<String, Arc<dyn Handler>>,
    factories: BTreeMap<String, Arc<Factory>>,
}

impl Registry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            libraries: Vec::new(),
            hw_apis: Vec::new(),
            handlers: HashMap::new(),
            factories: BTreeMap::new(),
        }
    }

    pub fn register_library(&mut self, library: Arc<dyn CodecLibrary>) {
        self.libraries.push(library);
    }

    pub fn register_hw_api(&mut self, api: Arc<dyn HwApi>) {
        self.hw_apis.push(api);
    }

    /// Register the handler of a codec name. A later registration replaces
    /// an earlier one.
    pub fn register_handler(&mut self, codec: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(codec.to_string(), handler);
    }

    #[must_use]
    pub fn handler(&self, codec: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(codec).cloned()
    }

    #[must_use]
    pub fn has_handler(&self, codec: &str) -> bool {
        self.handlers.contains_key(codec)
    }

    /// Create factories for every encoder of every registered library.
    /// Returns the number of factories added.
    ///
    /// Hardware encoders get a texture factory when a matching hardware
    /// API is registered, plus a software-input fallback.
    pub fn register_encoders(&mut self) -> usize {
        let mut added = 0;
        for library in self.libraries.clone() {
            for info in library.encoders() {
                let handler = self.handler(&info.name);
                if handler.is_none() && !self.config.include_unhandled {
                    tracing::debug!("skipping {}: no handler", info.name);
                    continue;
                }

                if info.is_hardware() {
                    let api = self
                        .hw_apis
                        .iter()
                        .find(|api| info.hw_device_types.contains(&api.device_type()))
                        .cloned();
                    match api {
                        Some(api) => {
                            added += self.add_factory(Factory {
                                descriptor: CodecDescriptor::texture(info.clone()),
                                library: Arc::clone(&library),
                                hw_api: Some(api),
                                handler: handler.clone(),
                            });
                        }
                        None => tracing::debug!(
                            "{}: no hardware API for {:?}, software input only",
                            info.name,
                            info.hw_device_types
                        ),
                    }
                }

                added += self.add_factory(Factory {
                    descriptor: CodecDescriptor::software(info),
                    library: Arc::clone(&library),
                    hw_api: None,
                    handler,
                });
            }
        }
        tracing::info!("registered {} encoders", added);
        added
    }

    /// Every factory, ordered by uid.
    pub fn factories(&self) -> impl Iterator<Item = &Arc<Factory>> {
        self.factories.values()
    }

    /// Look a factory up by uid.
    pub fn factory(&self, uid: &str) -> Result<Arc<Factory>> {
        self.factories
            .get(uid)
            .cloned()
            .ok_or_else(|| EncodeError::UnknownEncoder(uid.to_string()))
    }

    fn add_factory(&mut self, factory: Factory) -> usize {
        let uid = factory.descriptor.uid.clone();
        if self.factories.contains_key(&uid) {
            tracing::warn!("{} already registered, keeping the first", uid);
            return 0;
        }
        tracing::debug!("registered {} ({})", uid, factory.descriptor.readable_name);
        self.factories.insert(uid, Arc::new(factory));
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DefaultHandler;
    use crate::instance::State;
    use crate::settings::keys;
    use crate::testing::{MockHwApi, MockLibrary, MockScript, MOCK_AUDIO, MOCK_H264, MOCK_H264_HW};
    use ffenc_codec::{HwDeviceType, RawLibrary};

    /// Prefers I420 whatever the codec lists first.
    struct I420Handler;

    impl Handler for I420Handler {
        fn defaults(&self, _info: &CodecInfo, settings: &mut Settings, hardware: bool) {
            settings.set_default("preset", if hardware { "p4" } else { "veryfast" });
        }

        fn translate(
            &self,
            _info: &CodecInfo,
            settings: &Settings,
            options: &mut CodecOptions,
        ) -> std::result::Result<(), crate::settings::SettingsError> {
            if let Some(preset) = settings.str("preset")? {
                options.set("preset", preset);
            }
            Ok(())
        }

        fn override_pixel_format(&self, info: &CodecInfo, selected: PixelFormat) -> PixelFormat {
            if info.supports_pixel_format(PixelFormat::I420) {
                PixelFormat::I420
            } else {
                selected
            }
        }
    }

    fn mock_registry(with_hw: bool) -> (Arc<MockLibrary>, MockHwApi, Registry) {
        let library = Arc::new(MockLibrary::new(MockScript::default()));
        let api = MockHwApi::new();
        let mut registry = Registry::new(RegistryConfig::default());
        registry.register_library(library.clone());
        if with_hw {
            registry.register_hw_api(Arc::new(api.clone()));
        }
        for codec in [MOCK_H264, MOCK_H264_HW, MOCK_AUDIO] {
            registry.register_handler(codec, Arc::new(DefaultHandler));
        }
        registry.register_encoders();
        (library, api, registry)
    }

    fn defaults(factory: &Factory) -> Settings {
        let mut settings = Settings::new();
        factory.defaults(&mut settings, factory.descriptor().hardware);
        settings
    }

    #[test]
    fn test_descriptor_uids() {
        let software = CodecDescriptor::software(CodecInfo::video("libx264", "x264", &[]));
        assert_eq!(software.uid, "ffenc-libx264");
        assert!(!software.hardware);

        let info = CodecInfo::video("h264_nvenc", "NVENC H.264", &[PixelFormat::Nv12])
            .with_hw_device(HwDeviceType::Cuda);
        let texture = CodecDescriptor::texture(info.clone());
        let fallback = CodecDescriptor::software(info);
        assert_eq!(texture.uid, "ffenc-h264_nvenc");
        assert!(texture.hardware);
        assert_eq!(fallback.uid, "ffenc-h264_nvenc-sw");
        assert_eq!(fallback.readable_name, "NVENC H.264 (software input)");
    }

    #[test]
    fn test_hardware_encoder_gets_texture_and_fallback() {
        let (_library, _api, registry) = mock_registry(true);
        let uids: Vec<&str> = registry.factories().map(|f| f.descriptor().uid.as_str()).collect();
        assert_eq!(
            uids,
            vec!["ffenc-mock264", "ffenc-mock264_cuda", "ffenc-mock264_cuda-sw", "ffenc-mockaudio"]
        );
    }

    #[test]
    fn test_no_texture_factory_without_hw_api() {
        let (_library, _api, registry) = mock_registry(false);
        assert!(registry.factory("ffenc-mock264_cuda").is_err());
        assert!(registry.factory("ffenc-mock264_cuda-sw").is_ok());
    }

    #[test]
    fn test_unhandled_encoders_skipped() {
        let mut registry = Registry::new(RegistryConfig::default());
        registry.register_library(Arc::new(RawLibrary::new()));
        registry.register_handler("rawvideo", Arc::new(DefaultHandler));
        assert_eq!(registry.register_encoders(), 1);
        assert!(matches!(
            registry.factory("ffenc-pcm_s16le"),
            Err(EncodeError::UnknownEncoder(uid)) if uid == "ffenc-pcm_s16le"
        ));

        let mut registry = Registry::new(RegistryConfig {
            include_unhandled: true,
        });
        registry.register_library(Arc::new(RawLibrary::new()));
        assert_eq!(registry.register_encoders(), 3);
    }

    #[test]
    fn test_duplicate_uid_keeps_first() {
        let mut registry = Registry::new(RegistryConfig {
            include_unhandled: true,
        });
        registry.register_library(Arc::new(RawLibrary::new()));
        registry.register_library(Arc::new(RawLibrary::new()));
        assert_eq!(registry.register_encoders(), 3);
        assert_eq!(registry.factories().count(), 3);
    }

    #[test]
    fn test_create_video_converts_host_format() {
        let (_library, _api, registry) = mock_registry(false);
        let factory = registry.factory("ffenc-mock264").unwrap();
        let settings = defaults(&factory);
        let input = VideoInput::new(64, 32, PixelFormat::Bgra).framerate(60, 1);
        let instance = factory.create_video(&settings, &input).unwrap();

        let info = instance.video_info().unwrap();
        assert_eq!(info.format, PixelFormat::Nv12);
        assert_eq!((info.width, info.height), (64, 32));
        assert!(!instance.is_hardware_encode());
        assert_eq!(instance.state(), State::Configured);
    }

    #[test]
    fn test_custom_settings_reach_codec() {
        let (library, _api, registry) = mock_registry(false);
        let factory = registry.factory("ffenc-mock264").unwrap();
        let mut settings = defaults(&factory);
        settings.set(keys::BITRATE, 6000);
        settings.set(keys::KEYFRAME_SECONDS, 1.0);
        settings.set(keys::CUSTOM_SETTINGS, "-bf=0 -tune=zerolatency");
        let input = VideoInput::new(64, 32, PixelFormat::Nv12).framerate(60, 1);
        let instance = factory.create_video(&settings, &input).unwrap();
        assert_eq!(instance.state(), State::Configured);

        let log = library.log();
        assert_eq!(log.options, vec![("bf".to_string(), "0".to_string())]);
        assert_eq!(log.opens, 1);
    }

    #[test]
    fn test_color_format_override() {
        let (_library, _api, registry) = mock_registry(false);
        let factory = registry.factory("ffenc-mock264").unwrap();
        let input = VideoInput::new(64, 32, PixelFormat::Nv12);

        let mut settings = defaults(&factory);
        settings.set(keys::COLOR_FORMAT, "i420");
        let instance = factory.create_video(&settings, &input).unwrap();
        assert_eq!(instance.video_info().unwrap().format, PixelFormat::I420);

        settings.set(keys::COLOR_FORMAT, "i444");
        assert!(matches!(
            factory.create_video(&settings, &input),
            Err(EncodeError::Configuration { .. })
        ));
    }

    #[test]
    fn test_handler_defaults_translation_and_format_override() {
        let library = Arc::new(MockLibrary::new(MockScript::default()));
        let mut registry = Registry::new(RegistryConfig::default());
        registry.register_library(library.clone());
        registry.register_handler(MOCK_H264, Arc::new(I420Handler));
        registry.register_encoders();

        let factory = registry.factory("ffenc-mock264").unwrap();
        let settings = defaults(&factory);
        assert_eq!(settings.str("preset").unwrap(), Some("veryfast"));

        let input = VideoInput::new(64, 32, PixelFormat::Nv12);
        let instance = factory.create_video(&settings, &input).unwrap();
        assert_eq!(instance.video_info().unwrap().format, PixelFormat::I420);
        assert_eq!(
            library.log().options,
            vec![("preset".to_string(), "veryfast".to_string())]
        );
    }

    #[test]
    fn test_create_audio_checks_sample_format() {
        let (_library, _api, registry) = mock_registry(false);
        let factory = registry.factory("ffenc-mockaudio").unwrap();
        let settings = defaults(&factory);

        let input = AudioInput {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::S16,
        };
        assert!(matches!(
            factory.create_audio(&settings, &input),
            Err(EncodeError::Configuration { .. })
        ));

        let input = AudioInput {
            format: SampleFormat::F32,
            ..input
        };
        let instance = factory.create_audio(&settings, &input).unwrap();
        assert_eq!(instance.audio_info().unwrap().channels, 2);
        assert!(matches!(
            factory.create_video(&settings, &VideoInput::new(64, 32, PixelFormat::Nv12)),
            Err(EncodeError::Configuration { .. })
        ));
    }

    #[test]
    fn test_create_texture_opens_device() {
        let (_library, api, registry) = mock_registry(true);
        let input = VideoInput::new(64, 32, PixelFormat::Nv12);

        let factory = registry.factory("ffenc-mock264_cuda").unwrap();
        let mut settings = defaults(&factory);
        settings.set(keys::GPU, 1);
        let instance = factory.create_texture(&settings, &input).unwrap();
        assert!(instance.is_hardware_encode());
        assert_eq!(api.stats().instances, 1);

        let fallback = registry.factory("ffenc-mock264_cuda-sw").unwrap();
        assert!(matches!(
            fallback.create_texture(&settings, &input),
            Err(EncodeError::Configuration { .. })
        ));
        assert!(fallback.create_video(&settings, &input).is_ok());
    }

    #[test]
    fn test_unknown_gpu_fails_import() {
        let (_library, _api, registry) = mock_registry(true);
        let factory = registry.factory("ffenc-mock264_cuda").unwrap();
        let mut settings = defaults(&factory);
        settings.set(keys::GPU, 5);
        let input = VideoInput::new(64, 32, PixelFormat::Nv12);
        assert!(matches!(
            factory.create_texture(&settings, &input),
            Err(EncodeError::HardwareImportFailed { .. })
        ));
    }
}
