//! Collects the program's interface (attributes, uniforms, buffers, images) and builds the
//! [ShaderReflection] handed to the host.

use log::trace;

use crate::ast::{
    AttribQualifier, BinaryOp, ExprId, ExpressionKind, LiteralValue, NodeKind, StorageQualifier,
};
use crate::common::{
    ShaderReflection, ShaderStage, ShaderUniform, TypeId, UniformFormat, UniformGroup, VertexAttrib,
    VertexAttribFormat,
};

use super::Analyzer;

fn vertex_attrib_format(id: TypeId) -> VertexAttribFormat {
    match id {
        TypeId::Float => VertexAttribFormat::R32Float,
        TypeId::Vec2 => VertexAttribFormat::R32G32Float,
        TypeId::Vec3 => VertexAttribFormat::R32G32B32Float,
        TypeId::Vec4 => VertexAttribFormat::R32G32B32A32Float,
        _ => VertexAttribFormat::Undefined,
    }
}

fn uniform_format(id: TypeId) -> UniformFormat {
    match id {
        TypeId::Float => UniformFormat::Float,
        TypeId::Vec2 => UniformFormat::Float2,
        TypeId::Vec4 => UniformFormat::Float4,
        TypeId::Mat4 => UniformFormat::Float16,
        TypeId::Int => UniformFormat::Int,
        TypeId::Int2 => UniformFormat::Int2,
        TypeId::Int4 => UniformFormat::Int4,
        TypeId::UInt => UniformFormat::UInt,
        TypeId::UInt2 => UniformFormat::UInt2,
        TypeId::UInt4 => UniformFormat::UInt4,
        _ => UniformFormat::Undefined,
    }
}

impl<'a> Analyzer<'a> {
    /// Evaluates a constant array size expression built from integer literals and `+ - * /`.
    pub(super) fn eval_array_size(&self, id: ExprId) -> Option<i64> {
        let e = self.ast.expressions.get(id as usize)?;
        match &e.kind {
            ExpressionKind::Literal(l) => match l.value {
                LiteralValue::Int(v) if matches!(e.ty.id, TypeId::Int | TypeId::UInt) => {
                    i64::try_from(v).ok()
                }
                _ => None,
            },
            ExpressionKind::Parenthesis(inner) => self.eval_array_size(*inner),
            ExpressionKind::Binary { op, lhs, rhs } => {
                let a = self.eval_array_size(*lhs)?;
                let b = self.eval_array_size(*rhs)?;
                match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Sub => a.checked_sub(b),
                    BinaryOp::Mul => a.checked_mul(b),
                    BinaryOp::Div => a.checked_div(b),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub(super) fn collect_reflection(&mut self) {
        self.ast.in_attributes.clear();
        self.ast.out_attributes.clear();
        self.ast.uniforms.clear();
        self.ast.buffers.clear();
        self.ast.readonly_buffers.clear();
        self.ast.readonly_images.clear();

        let mut root = std::mem::take(&mut self.ast.root);
        for node in root.iter_mut() {
            let (line, column) = (node.line, node.column);
            match &mut node.kind {
                NodeKind::VariableDefinitions(vd) => {
                    let storage = vd.storage;
                    let readonly = vd.attributes.has(AttribQualifier::Readonly);
                    let dv = match vd.variables.first_mut() {
                        Some(dv) => dv,
                        None => continue,
                    };
                    match storage {
                        StorageQualifier::In => self.ast.in_attributes.push(dv.id),
                        StorageQualifier::Out => self.ast.out_attributes.push(dv.id),
                        StorageQualifier::Uniform => {
                            if self.ast.var(dv.id).ty.is_array() {
                                let size = dv
                                    .size
                                    .and_then(|s| self.eval_array_size(s))
                                    .and_then(|v| u32::try_from(v).ok());
                                if size.is_none() {
                                    let v = self.ast.var(dv.id).clone();
                                    self.report_unable_to_eval_array_size(line, column, &v);
                                }
                                dv.array_size = size;
                            }
                            self.ast.uniforms.push(dv.id);
                        }
                        StorageQualifier::Buffer => {
                            self.ast.buffers.push(dv.id);
                            if readonly {
                                self.ast.readonly_buffers.push(dv.id);
                            }
                        }
                        _ => {}
                    }
                }
                NodeKind::ImageDefinition(image) => {
                    if image.attributes.has(AttribQualifier::Readonly) {
                        self.ast.readonly_images.push(image.id);
                    }
                }
                NodeKind::NumThreads(n) => self.ast.num_threads = Some(*n),
                _ => {}
            }
        }
        self.ast.root = root;
        trace!(
            "interface: {} in, {} out, {} uniforms, {} buffers",
            self.ast.in_attributes.len(),
            self.ast.out_attributes.len(),
            self.ast.uniforms.len(),
            self.ast.buffers.len()
        );
    }

    fn uniform_array_size(&self, id: u32) -> u32 {
        self.ast
            .root
            .iter()
            .filter_map(|n| n.as_variable_definitions())
            .filter_map(|vd| vd.variables.first())
            .find(|dv| dv.id == id)
            .and_then(|dv| dv.array_size)
            .unwrap_or(0)
    }

    pub(super) fn create_reflection(&mut self) {
        let mut r = ShaderReflection::default();

        if self.stage == ShaderStage::Vertex {
            for id in &self.ast.in_attributes {
                let v = self.ast.var(*id);
                r.used_vertex_attribs.push(VertexAttrib {
                    semantic: v.orig_name.clone(),
                    format: vertex_attrib_format(v.ty.id),
                });
            }
        }

        for id in &self.ast.uniforms {
            let v = self.ast.var(*id);
            let (element, size) = if v.ty.is_array() {
                (v.ty.base_type().id, self.uniform_array_size(*id))
            } else {
                (v.ty.id, 1)
            };
            if element == TypeId::SubpassInput {
                continue;
            }
            let mut u = ShaderUniform::new(v.orig_name.clone(), UniformGroup::PerDraw);
            u.size = size;
            if v.ty.base_type().is_sampler() {
                u.format = UniformFormat::Texture;
                r.used_uniform_textures.push(u);
            } else {
                u.format = uniform_format(element);
                r.used_uniforms.push(u);
            }
        }

        let resource = |name: &str, format: UniformFormat| {
            let mut u = ShaderUniform::new(name, UniformGroup::PerDraw);
            u.format = format;
            u.size = 1;
            u
        };
        for id in &self.ast.buffers {
            r.used_uniform_buffers
                .push(resource(&self.ast.var(*id).orig_name, UniformFormat::Buffer));
        }
        for id in &self.ast.readonly_buffers {
            r.used_readonly_buffers
                .push(resource(&self.ast.var(*id).orig_name, UniformFormat::Buffer));
        }
        for id in &self.ast.readonly_images {
            r.used_readonly_images
                .push(resource(&self.ast.var(*id).orig_name, UniformFormat::Texture));
        }

        r.work_group_size = self.ast.num_threads.unwrap_or([0, 0, 0]);
        self.reflection = r;
    }
}
