//! Local spectrum rendering on two 128x64 SPI OLED panels.
//!
//! The left panel shows the first half of the bars, the right panel the
//! second half.  Each bar has a one-pixel peak marker that falls by one
//! pixel per frame.

use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::ascii::FONT_4X6;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};

use display_interface_spi::SPIInterface;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::Ssd1306;

use crate::config::OledConfig;
use crate::error::HardwareError;
use crate::gpio::GpioChip;
use crate::spectrum::SpectrumFrame;

/// Bottom row of the bar area; labels sit below it.
const BASELINE: i32 = 53;
const BAR_X0: i32 = 2;
const BAR_PITCH: i32 = 19;
const BAR_WIDTH: u32 = 11;
const LABEL_X0: i32 = 1;
const SPI_HZ: u32 = 8_000_000;

pub const LEFT_LABELS: &[&str] = &["16K", "6.3K", "2.5K", "1K", "400", "160", "63"];
pub const RIGHT_LABELS: &[&str] = &["63", "160", "400", "1K", "2.5K", "6.3K", "16K"];

/// Level 0..=255 → bar height in pixels.
pub fn bar_height(level: u8) -> i32 {
    i32::from(level) * BASELINE / 255
}

/// Bars plus peak-hold state for one panel.
pub struct SpectrumPanel {
    peaks: Vec<i32>,
    labels: &'static [&'static str],
}

impl SpectrumPanel {
    pub fn new(labels: &'static [&'static str]) -> Self {
        Self {
            peaks: Vec::new(),
            labels,
        }
    }

    /// Advance peak-hold with a new set of levels and return
    /// `(height, peak)` per bar as they should be drawn this frame.
    pub fn advance(&mut self, levels: &[u8]) -> Vec<(i32, i32)> {
        self.peaks.resize(levels.len(), 0);
        levels
            .iter()
            .zip(self.peaks.iter_mut())
            .map(|(&level, peak)| {
                let height = bar_height(level);
                *peak = (*peak).max(height);
                let shown = *peak;
                *peak = (*peak - 1).max(0);
                (height, shown)
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.peaks.iter_mut().for_each(|p| *p = 0);
    }

    pub fn draw<D>(&mut self, levels: &[u8], target: &mut D) -> Result<(), D::Error>
    where
        D: DrawTarget<Color = BinaryColor>,
    {
        let fill = PrimitiveStyle::with_fill(BinaryColor::On);
        let stroke = PrimitiveStyle::with_stroke(BinaryColor::On, 1);

        for (i, (height, peak)) in self.advance(levels).into_iter().enumerate() {
            let x = BAR_X0 + i as i32 * BAR_PITCH;
            if height > 0 {
                Rectangle::new(
                    Point::new(x, BASELINE - height + 1),
                    Size::new(BAR_WIDTH, height as u32),
                )
                .into_styled(fill)
                .draw(target)?;
            }
            let y = BASELINE - peak;
            Line::new(Point::new(x, y), Point::new(x + BAR_WIDTH as i32 - 1, y))
                .into_styled(stroke)
                .draw(target)?;
        }

        let style = MonoTextStyle::new(&FONT_4X6, BinaryColor::On);
        for (i, label) in self.labels.iter().enumerate() {
            Text::with_baseline(
                label,
                Point::new(LABEL_X0 + i as i32 * BAR_PITCH, BASELINE + 1),
                style,
                Baseline::Top,
            )
            .draw(target)?;
        }
        Ok(())
    }
}

type Panel = Ssd1306<
    SPIInterface<SpidevDevice, CdevPin>,
    DisplaySize128x64,
    BufferedGraphicsMode<DisplaySize128x64>,
>;

struct OledPanel {
    name: &'static str,
    display: Panel,
    spectrum: SpectrumPanel,
}

impl OledPanel {
    fn open(
        name: &'static str,
        chip: &mut GpioChip,
        spi_path: &str,
        dc_pin: u32,
        rst_pin: u32,
        labels: &'static [&'static str],
    ) -> Result<Self, HardwareError> {
        let err = |reason: String| HardwareError::Display { panel: name, reason };

        let mut spi =
            SpidevDevice::open(spi_path).map_err(|e| err(format!("{spi_path}: {e:?}")))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.0
            .configure(&options)
            .map_err(|e| err(format!("{spi_path}: {e}")))?;

        let dc = CdevPin::new(chip.output(dc_pin, 0)?).map_err(|e| err(format!("DC: {e}")))?;
        let mut rst =
            CdevPin::new(chip.output(rst_pin, 1)?).map_err(|e| err(format!("RST: {e}")))?;

        let interface = SPIInterface::new(spi, dc);
        let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
            .into_buffered_graphics_mode();
        display
            .reset(&mut rst, &mut Delay)
            .map_err(|e| err(format!("reset: {e:?}")))?;
        display.init().map_err(|e| err(format!("init: {e:?}")))?;
        display.clear_buffer();
        display.flush().map_err(|e| err(format!("flush: {e:?}")))?;
        log::info!("OLED {name} initialised on {spi_path}");

        Ok(Self {
            name,
            display,
            spectrum: SpectrumPanel::new(labels),
        })
    }

    fn render(&mut self, levels: &[u8]) -> Result<(), HardwareError> {
        self.display.clear_buffer();
        let drawn = self.spectrum.draw(levels, &mut self.display);
        drawn
            .and_then(|()| self.display.flush())
            .map_err(|e| display_err(self.name, e))
    }

    fn clear(&mut self) -> Result<(), HardwareError> {
        self.spectrum.reset();
        self.display.clear_buffer();
        self.display.flush().map_err(|e| display_err(self.name, e))
    }
}

fn display_err(panel: &'static str, e: impl std::fmt::Debug) -> HardwareError {
    HardwareError::Display {
        panel,
        reason: format!("{e:?}"),
    }
}

/// Both panels.
pub struct DualOled {
    left: OledPanel,
    right: OledPanel,
}

impl DualOled {
    pub fn open(config: &OledConfig, chip: &mut GpioChip) -> Result<Self, HardwareError> {
        let left = OledPanel::open(
            "left",
            chip,
            &config.left_spi,
            config.left_dc,
            config.left_rst,
            LEFT_LABELS,
        )?;
        let right = OledPanel::open(
            "right",
            chip,
            &config.right_spi,
            config.right_dc,
            config.right_rst,
            RIGHT_LABELS,
        )?;
        Ok(Self { left, right })
    }

    pub fn render(&mut self, frame: &SpectrumFrame) -> Result<(), HardwareError> {
        let (left, right) = frame.split_channels();
        self.left.render(left)?;
        self.right.render(right)
    }

    /// Blank both panels (idle).
    pub fn clear(&mut self) -> Result<(), HardwareError> {
        self.left.clear()?;
        self.right.clear()
    }
}
