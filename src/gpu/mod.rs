// SPDX-License-Identifier: GPL-3.0-or-later

pub mod wgpu;

pub use self::wgpu::WarpRenderer;
