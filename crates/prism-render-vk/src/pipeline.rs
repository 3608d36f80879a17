// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline builder. Configuration is plain data so variants can be
//! cloned and tweaked; `build` compiles it against a render pass and extent.
use crate::shader::{stage_infos, Shader};
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_math::Vertex;
use std::mem::{offset_of, size_of};
use tracing::info;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub name: &'static str,
    pub vert: vk::ShaderModule,
    pub frag: vk::ShaderModule,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub samples: vk::SampleCountFlags,
    pub push_constant_size: u32,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
}

impl PipelineConfig {
    pub fn new(name: &'static str, set_layouts: Vec<vk::DescriptorSetLayout>) -> Self {
        Self {
            name,
            vert: vk::ShaderModule::null(),
            frag: vk::ShaderModule::null(),
            set_layouts,
            samples: vk::SampleCountFlags::TYPE_1,
            push_constant_size: 0,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
        }
    }

    pub fn set_name(&mut self, name: &'static str) -> &mut Self {
        self.name = name;
        self
    }

    pub fn set_shader(&mut self, shader: &Shader) -> &mut Self {
        (self.vert, self.frag) = shader.modules();
        self
    }

    pub fn set_msaa(&mut self, samples: vk::SampleCountFlags) -> &mut Self {
        self.samples = samples;
        self
    }

    pub fn set_push_constants_size(&mut self, size: u32) -> &mut Self {
        self.push_constant_size = size;
        self
    }

    pub fn set_wireframe_mode(&mut self, on: bool) -> &mut Self {
        self.polygon_mode = if on {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        };
        self
    }

    pub fn set_cull_mode(&mut self, mode: vk::CullModeFlags) -> &mut Self {
        self.cull_mode = mode;
        self
    }

    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        if self.push_constant_size == 0 {
            return Vec::new();
        }
        vec![vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: self.push_constant_size,
        }]
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 4] {
    let attr = |location, format, offset: usize| vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    };
    [
        attr(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, pos)),
        attr(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attr(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
        attr(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
    ]
}

/// Full-extent viewport, depth 0..1.
pub fn viewport_for(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    (
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
    )
}

pub struct Pipeline {
    device: ash::Device,
    config: PipelineConfig,
    layout: vk::PipelineLayout,
    handle: vk::Pipeline,
}

impl Pipeline {
    pub fn new(device: &ash::Device, config: PipelineConfig) -> Self {
        Self {
            device: device.clone(),
            config,
            layout: vk::PipelineLayout::null(),
            handle: vk::Pipeline::null(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn is_built(&self) -> bool {
        self.handle != vk::Pipeline::null()
    }

    /// Compiles the current configuration. Whatever was built before is
    /// destroyed first, so this doubles as an in-place rebuild.
    pub fn build(&mut self, render_pass: vk::RenderPass, extent: vk::Extent2D) -> Result<()> {
        self.cleanup();
        let cfg = &self.config;
        let d = &self.device;

        let stages = stage_infos(cfg.vert, cfg.frag);

        let vb = vertex_binding();
        let va = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &vb,
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };

        // STRICT: viewport is baked; an extent change means a rebuild.
        let (viewport, scissor) = viewport_for(extent);
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: cfg.polygon_mode,
            cull_mode: cfg.cull_mode,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: cfg.samples,
            sample_shading_enable: vk::FALSE,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: vk::CompareOp::LESS,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let push_ranges = cfg.push_constant_ranges();
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: cfg.set_layouts.len() as u32,
            p_set_layouts: cfg.set_layouts.as_ptr(),
            push_constant_range_count: push_ranges.len() as u32,
            p_push_constant_ranges: push_ranges.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { d.create_pipeline_layout(&layout_info, None) }
            .context("create_pipeline_layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };
        let pipelines = match unsafe {
            d.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        } {
            Ok(p) => p,
            Err((_, err)) => {
                unsafe { d.destroy_pipeline_layout(layout, None) };
                return Err(anyhow!("create_graphics_pipelines({}) failed: {:?}", cfg.name, err));
            }
        };

        info!(
            "pipeline '{}' built ({}x{}, {:?}, {:?})",
            cfg.name, extent.width, extent.height, cfg.polygon_mode, cfg.samples
        );
        self.layout = layout;
        self.handle = pipelines[0];
        Ok(())
    }

    pub fn cleanup(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
        self.handle = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
    }
}

/// Copies the configuration only; the clone has to be built on its own.
impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Self::new(&self.device, self.config.clone())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::new("phong", Vec::new());
        assert_eq!(c.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(c.push_constant_size, 0);
        assert_eq!(c.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(c.cull_mode, vk::CullModeFlags::BACK);
        assert!(c.push_constant_ranges().is_empty());
    }

    #[test]
    fn cloned_variant_differs_in_one_field() {
        let mut phong = PipelineConfig::new("phong", Vec::new());
        phong
            .set_msaa(vk::SampleCountFlags::TYPE_4)
            .set_push_constants_size(112);

        let mut wire = phong.clone();
        wire.set_name("wireframe").set_wireframe_mode(true);

        assert_eq!(wire.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(phong.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(wire.samples, phong.samples);
        assert_eq!(wire.push_constant_size, phong.push_constant_size);
        assert_eq!(wire.cull_mode, phong.cull_mode);
    }

    #[test]
    fn push_constants_live_on_vertex_stage() {
        let mut c = PipelineConfig::new("phong", Vec::new());
        c.set_push_constants_size(112);
        let r = c.push_constant_ranges();
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].stage_flags, vk::ShaderStageFlags::VERTEX);
        assert_eq!((r[0].offset, r[0].size), (0, 112));
    }

    #[test]
    fn attributes_match_vertex_layout() {
        let a = vertex_attributes();
        let locs: Vec<u32> = a.iter().map(|x| x.location).collect();
        assert_eq!(locs, [0, 1, 2, 3]);
        assert_eq!(a[0].offset, 0);
        assert_eq!(a[1].offset, 12);
        assert_eq!(a[2].offset, 24);
        assert_eq!(a[3].offset, 36);
        assert_eq!(a[3].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(vertex_binding().stride, 44);
    }

    #[test]
    fn viewport_covers_extent() {
        let (vp, sc) = viewport_for(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!((vp.width, vp.height), (1280.0, 720.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        assert_eq!((sc.extent.width, sc.extent.height), (1280, 720));
    }
}
