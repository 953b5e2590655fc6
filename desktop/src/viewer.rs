use eframe::egui;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fishcount_core::{
    app::{App, PlaybackState, TextLog, TickOutcome},
    detection::Detect,
    media::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS},
    rendering::{DISPLAY_HEIGHT, DISPLAY_WIDTH},
    RgbFrame,
};

const LOG_HEIGHT: f32 = 140.0;

/// egui front end over the playback controller.
pub struct Viewer {
    app: App<Box<dyn Detect>>,
    path_input: String,
    status: String,
    frame_tex: Option<egui::TextureHandle>,
    chart_tex: Option<egui::TextureHandle>,
    seen_revision: u64,
}

impl Viewer {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        app: App<Box<dyn Detect>>,
        initial: Option<PathBuf>,
    ) -> Self {
        let mut viewer = Self {
            app,
            path_input: String::new(),
            status: "Select a video or image".into(),
            frame_tex: None,
            chart_tex: None,
            seen_revision: u64::MAX,
        };
        if let Some(path) = initial {
            viewer.path_input = path.display().to_string();
            viewer.open(&path);
        }
        viewer
    }

    fn open(&mut self, path: &Path) {
        match self.app.select_file(path) {
            Ok(()) => self.status = format!("Loaded {}", path.display()),
            Err(e) => {
                tracing::warn!("failed to open {}: {e:#}", path.display());
                self.status = format!("{e:#}");
            }
        }
    }

    fn sync_textures(&mut self, ctx: &egui::Context) {
        let view = self.app.view();
        if view.revision == self.seen_revision {
            return;
        }
        self.seen_revision = view.revision;
        match view.frame.as_ref() {
            Some(frame) => upload(ctx, &mut self.frame_tex, "frame", frame),
            None => self.frame_tex = None,
        }
        upload(ctx, &mut self.chart_tex, "chart", &view.chart);
    }

    /// Native open dialog restricted to the supported media types.
    fn pick_media(&mut self) {
        let picked = rfd::FileDialog::new()
            .set_title("Select File")
            .add_filter("Media Files", &media_extensions()[..])
            .pick_file();
        if let Some(path) = picked {
            self.path_input = path.display().to_string();
            self.open(&path);
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Select media").clicked() {
                self.pick_media();
            }
            ui.separator();
            ui.label("File:");
            let edit = ui.add(
                egui::TextEdit::singleline(&mut self.path_input)
                    .desired_width(480.0)
                    .hint_text(".mp4  .avi  .jpg  .png"),
            );
            let submitted = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Open").clicked() || submitted {
                let path = PathBuf::from(self.path_input.trim());
                self.open(&path);
            }

            let playing = self.app.state() == PlaybackState::Playing;
            if ui.add_enabled(!playing, egui::Button::new("Start")).clicked() {
                self.status = if self.app.start() {
                    "Playing".into()
                } else {
                    "Nothing to play; select a video first".into()
                };
            }
            if ui.add_enabled(playing, egui::Button::new("Stop")).clicked() {
                self.app.stop();
                self.status = "Stopped".into();
            }
        });
        ui.label(&self.status);
    }
}

impl eframe::App for Viewer {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.viewport().close_requested()) {
            self.app.close();
            return;
        }

        let dropped: Option<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .find_map(|f| f.path.clone())
        });
        if let Some(path) = dropped {
            self.path_input = path.display().to_string();
            self.open(&path);
        }

        match self.app.tick(Instant::now()) {
            Ok(TickOutcome::EndOfStream) => self.status = "End of video".into(),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("playback stopped: {e:#}");
                self.status = format!("{e:#}");
            }
        }
        self.sync_textures(ctx);

        egui::TopBottomPanel::top("controls").show(ctx, |ui| self.controls(ui));

        egui::SidePanel::right("stats")
            .resizable(false)
            .min_width(420.0)
            .show(ctx, |ui| {
                let view = self.app.view();
                ui.heading(&view.count_label);
                if let Some(tex) = &self.chart_tex {
                    ui.add(egui::Image::from_texture(tex));
                }
                ui.separator();
                log_panel(ui, "Parameters", &view.param_log);
                ui.separator();
                log_panel(ui, "Coordinates", &view.coord_log);
            });

        egui::CentralPanel::default().show(ctx, |ui| match &self.frame_tex {
            Some(tex) => {
                ui.add(egui::Image::from_texture(tex).fit_to_exact_size(egui::vec2(
                    DISPLAY_WIDTH as f32,
                    DISPLAY_HEIGHT as f32,
                )));
            }
            None => {
                ui.label("No frame yet");
            }
        });

        if let Some(due) = self.app.next_deadline() {
            ctx.request_repaint_after(due.saturating_duration_since(Instant::now()));
        }
    }
}

fn media_extensions() -> Vec<&'static str> {
    VIDEO_EXTENSIONS
        .iter()
        .chain(IMAGE_EXTENSIONS)
        .copied()
        .collect()
}

fn upload(
    ctx: &egui::Context,
    slot: &mut Option<egui::TextureHandle>,
    name: &str,
    frame: &RgbFrame,
) {
    let image =
        egui::ColorImage::from_rgb([frame.width as usize, frame.height as usize], &frame.data);
    match slot {
        Some(tex) => tex.set(image, egui::TextureOptions::LINEAR),
        None => *slot = Some(ctx.load_texture(name, image, egui::TextureOptions::LINEAR)),
    }
}

fn log_panel(ui: &mut egui::Ui, title: &str, log: &TextLog) {
    ui.label(format!("{title} ({})", log.len()));
    if log.is_empty() {
        ui.weak("nothing yet");
        return;
    }
    egui::ScrollArea::vertical()
        .id_salt(title)
        .max_height(LOG_HEIGHT)
        .auto_shrink([false, true])
        .stick_to_bottom(true)
        .show(ui, |ui| {
            for line in log.lines() {
                ui.monospace(line);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_offers_every_supported_extension() {
        assert_eq!(media_extensions(), ["mp4", "avi", "jpg", "png"]);
    }
}
