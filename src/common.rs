//! Types shared by every compiler phase: the KSL type model, shader stages, target APIs
//! and the reflection contract filled in for the host graphics layer.

use std::fmt::{Display, Formatter};

use bitflags::bitflags;

/// Identifier of a KSL type.
///
/// Inbuilt types are listed explicitly, user defined structs are referenced by their index
/// in [crate::ast::ProgramAst::user_types].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeId {
    Invalid,
    Void,

    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,

    Int,
    Int2,
    Int3,
    Int4,

    UInt,
    UInt2,
    UInt3,
    UInt4,

    Bool,
    Bool2,
    Bool3,
    Bool4,

    Sampler2D,
    Sampler2DArray,
    SamplerCube,
    SamplerCubeArray,
    Sampler2DShadow,
    Sampler2DArrayShadow,
    SamplerCubeShadow,

    Image2D,
    SubpassInput,

    Array,
    User(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum Precision {
    Invalid,
    High,
    Medium,
    Low,
    None,
}

bitflags! {
    /// Coarse classification of [TypeId]s, usable as a mask when collecting definitions.
    pub struct TypeClass: u32 {
        const VOID = 1 << 0;
        const FLOAT = 1 << 1;
        const INT = 1 << 2;
        const UINT = 1 << 3;
        const BOOL = 1 << 4;
        const SAMPLER = 1 << 5;
        const IMAGE = 1 << 6;
        const SUBPASS_INPUT = 1 << 7;
        const ARRAY = 1 << 8;
        const USER_DEFINED = 1 << 9;

        const NUMERIC = Self::FLOAT.bits | Self::INT.bits | Self::UINT.bits;
        const ALL = Self::VOID.bits
            | Self::NUMERIC.bits
            | Self::BOOL.bits
            | Self::SAMPLER.bits
            | Self::IMAGE.bits
            | Self::SUBPASS_INPUT.bits
            | Self::ARRAY.bits
            | Self::USER_DEFINED.bits;
    }
}

/// A KSL type with its precision.
///
/// Equality ignores precision: precision mismatches are reported separately from type mismatches.
/// Arrays compare by their base type.
#[derive(Debug, Clone)]
pub struct KslType {
    pub id: TypeId,
    pub precision: Precision,
    pub base: Option<Box<KslType>>,
}

impl PartialEq for KslType {
    fn eq(&self, other: &Self) -> bool {
        if self.id != other.id {
            return false;
        }
        match (self.id, &self.base, &other.base) {
            (TypeId::Array, Some(a), Some(b)) => a == b,
            (TypeId::Array, _, _) => false,
            _ => true,
        }
    }
}
impl Eq for KslType {}

impl Default for KslType {
    fn default() -> Self {
        Self::invalid()
    }
}

impl KslType {
    pub fn new(id: TypeId, precision: Precision) -> Self {
        Self {
            id,
            precision,
            base: None,
        }
    }

    pub fn invalid() -> Self {
        Self::new(TypeId::Invalid, Precision::Invalid)
    }

    pub fn void() -> Self {
        Self::new(TypeId::Void, Precision::None)
    }

    pub fn array_of(base: KslType) -> Self {
        Self {
            id: TypeId::Array,
            precision: Precision::None,
            base: Some(Box::new(base)),
        }
    }

    /// Builds the scalar or vector type of `class` with `component_count` components.
    /// The precision is left [Precision::Invalid] for the caller to fill in.
    pub fn create(class: TypeClass, component_count: u32) -> Option<Self> {
        let id = if class == TypeClass::FLOAT {
            match component_count {
                1 => TypeId::Float,
                2 => TypeId::Vec2,
                3 => TypeId::Vec3,
                4 => TypeId::Vec4,
                _ => return None,
            }
        } else if class == TypeClass::INT {
            match component_count {
                1 => TypeId::Int,
                2 => TypeId::Int2,
                3 => TypeId::Int3,
                4 => TypeId::Int4,
                _ => return None,
            }
        } else if class == TypeClass::UINT {
            match component_count {
                1 => TypeId::UInt,
                2 => TypeId::UInt2,
                3 => TypeId::UInt3,
                4 => TypeId::UInt4,
                _ => return None,
            }
        } else {
            return None;
        };
        Some(Self::new(id, Precision::Invalid))
    }

    pub fn is_resolved(&self) -> bool {
        self.id != TypeId::Invalid
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn type_class(&self) -> TypeClass {
        use TypeId::*;
        match self.id {
            Invalid => TypeClass::empty(),
            Void => TypeClass::VOID,
            Float | Vec2 | Vec3 | Vec4 | Mat2 | Mat3 | Mat4 => TypeClass::FLOAT,
            Int | Int2 | Int3 | Int4 => TypeClass::INT,
            UInt | UInt2 | UInt3 | UInt4 => TypeClass::UINT,
            Bool | Bool2 | Bool3 | Bool4 => TypeClass::BOOL,
            Sampler2D | Sampler2DArray | SamplerCube | SamplerCubeArray | Sampler2DShadow
            | Sampler2DArrayShadow | SamplerCubeShadow => TypeClass::SAMPLER,
            Image2D => TypeClass::IMAGE,
            SubpassInput => TypeClass::SUBPASS_INPUT,
            Array => TypeClass::ARRAY,
            User(_) => TypeClass::USER_DEFINED,
        }
    }

    pub fn is_numeric(&self) -> bool {
        TypeClass::NUMERIC.intersects(self.type_class())
    }
    pub fn is_bool(&self) -> bool {
        self.type_class() == TypeClass::BOOL
    }
    pub fn is_sampler(&self) -> bool {
        self.type_class() == TypeClass::SAMPLER
    }
    pub fn is_image(&self) -> bool {
        self.type_class() == TypeClass::IMAGE
    }
    pub fn is_subpass_input(&self) -> bool {
        self.type_class() == TypeClass::SUBPASS_INPUT
    }
    pub fn is_array(&self) -> bool {
        self.id == TypeId::Array
    }
    pub fn is_user_defined(&self) -> bool {
        matches!(self.id, TypeId::User(_))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.id, TypeId::Mat2 | TypeId::Mat3 | TypeId::Mat4)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.type_class(), TypeClass::INT | TypeClass::UINT)
    }

    pub fn is_vector(&self) -> bool {
        use TypeId::*;
        matches!(
            self.id,
            Vec2 | Vec3 | Vec4 | Int2 | Int3 | Int4 | UInt2 | UInt3 | UInt4 | Bool2 | Bool3 | Bool4
        )
    }

    pub fn is_shadow_sampler(&self) -> bool {
        matches!(
            self.id,
            TypeId::Sampler2DShadow | TypeId::Sampler2DArrayShadow | TypeId::SamplerCubeShadow
        )
    }

    /// Element type of an array, or the type itself for anything else.
    pub fn base_type(&self) -> &KslType {
        match &self.base {
            Some(b) => b,
            None => self,
        }
    }

    /// Number of scalar components. Zero for everything that is not a number or bool.
    pub fn component_count(&self) -> u32 {
        use TypeId::*;
        match self.id {
            Bool | Float | Int | UInt => 1,
            Bool2 | Vec2 | Int2 | UInt2 => 2,
            Bool3 | Vec3 | Int3 | UInt3 => 3,
            Bool4 | Vec4 | Int4 | UInt4 | Mat2 => 4,
            Mat3 => 9,
            Mat4 => 16,
            _ => 0,
        }
    }

    /// Bytes occupied by a uniform of this type in a 16 byte slotted uniform layout.
    pub fn uniform_slot_size(&self) -> u32 {
        match self.component_count() {
            0 => 0,
            n if n <= 4 => 16,
            9 => 48,
            _ => 64,
        }
    }

    /// Scalar type with the same class and precision. Used for vector element access.
    pub fn element_type(&self) -> Option<KslType> {
        if self.is_bool() {
            return Some(KslType::new(TypeId::Bool, self.precision));
        }
        KslType::create(self.type_class(), 1).map(|t| t.with_precision(self.precision))
    }

    /// Column type of a matrix.
    pub fn column_type(&self) -> Option<KslType> {
        let id = match self.id {
            TypeId::Mat2 => TypeId::Vec2,
            TypeId::Mat3 => TypeId::Vec3,
            TypeId::Mat4 => TypeId::Vec4,
            _ => return None,
        };
        Some(KslType::new(id, self.precision))
    }
}

/// Float and int spellings of a precision in KSL source.
pub fn ksl_precision_prefixes(precision: Precision) -> (&'static str, &'static str) {
    match precision {
        Precision::High => ("float", "int"),
        Precision::Medium => ("half", "short"),
        Precision::Low => ("lowp", "byte"),
        Precision::None | Precision::Invalid => ("float_noprec", "int_noprec"),
    }
}

impl Display for KslType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use TypeId::*;
        if let (Array, Some(base)) = (self.id, &self.base) {
            return write!(f, "{}[]", base);
        }
        let (fp, ip) = ksl_precision_prefixes(self.precision);
        match self.id {
            Invalid => write!(f, "invalid_type"),
            Void => write!(f, "void"),
            Float => write!(f, "{fp}"),
            Vec2 => write!(f, "{fp}2"),
            Vec3 => write!(f, "{fp}3"),
            Vec4 => write!(f, "{fp}4"),
            Mat2 => write!(f, "{fp}2x2"),
            Mat3 => write!(f, "{fp}3x3"),
            Mat4 => write!(f, "{fp}4x4"),
            Int => write!(f, "{ip}"),
            Int2 => write!(f, "{ip}2"),
            Int3 => write!(f, "{ip}3"),
            Int4 => write!(f, "{ip}4"),
            UInt => write!(f, "u{ip}"),
            UInt2 => write!(f, "u{ip}2"),
            UInt3 => write!(f, "u{ip}3"),
            UInt4 => write!(f, "u{ip}4"),
            Bool => write!(f, "bool"),
            Bool2 => write!(f, "bool2"),
            Bool3 => write!(f, "bool3"),
            Bool4 => write!(f, "bool4"),
            Sampler2D => write!(f, "sampler2D<{fp}>"),
            Sampler2DArray => write!(f, "sampler2DArray<{fp}>"),
            SamplerCube => write!(f, "samplerCube<{fp}>"),
            SamplerCubeArray => write!(f, "samplerCubeArray<{fp}>"),
            Sampler2DShadow => write!(f, "sampler2DShadow<{fp}>"),
            Sampler2DArrayShadow => write!(f, "sampler2DArrayShadow<{fp}>"),
            SamplerCubeShadow => write!(f, "samplerCubeShadow<{fp}>"),
            Image2D => write!(f, "image2D<{fp}>"),
            SubpassInput => write!(f, "subpassInput<{fp}>"),
            Array => write!(f, "invalid_array[]"),
            User(i) => write!(f, "user_type_{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum ShaderStage {
    Vertex = 0,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
}
impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::Fragment,
        ShaderStage::Geometry,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Compute,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum TargetApi {
    OpenGL = 0,
    OpenGLES,
    D3D11,
    D3D12,
    MetalIOS,
    MetalMacOS,
    Vulkan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFamily {
    Gl,
    D3D,
    Metal,
}

impl TargetApi {
    pub fn family(self) -> ApiFamily {
        match self {
            TargetApi::OpenGL | TargetApi::OpenGLES | TargetApi::Vulkan => ApiFamily::Gl,
            TargetApi::D3D11 | TargetApi::D3D12 => ApiFamily::D3D,
            TargetApi::MetalIOS | TargetApi::MetalMacOS => ApiFamily::Metal,
        }
    }
}

/// How often the host updates a uniform. Decides which interface block the uniform lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive)]
pub enum UniformGroup {
    PerDraw = 0,
    PerRendererChange,
    Manual,
}
impl UniformGroup {
    pub const ALL: [UniformGroup; 3] = [
        UniformGroup::PerDraw,
        UniformGroup::PerRendererChange,
        UniformGroup::Manual,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttribFormat {
    Undefined,
    R32Float,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformFormat {
    Float16,
    Float4,
    Texture,
    Float2,
    Float,
    Int,
    Int2,
    Int4,
    UInt,
    UInt2,
    UInt4,
    Buffer,
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttrib {
    pub semantic: String,
    pub format: VertexAttribFormat,
}

/// A named shader resource, used both as uniform group metadata supplied by the host
/// and as reflection output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderUniform {
    pub name: String,
    pub format: UniformFormat,
    pub size: u32,
    pub group: UniformGroup,
}
impl ShaderUniform {
    pub fn new(name: impl Into<String>, group: UniformGroup) -> Self {
        Self {
            name: name.into(),
            format: UniformFormat::Undefined,
            size: 0,
            group,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    pub used_vertex_attribs: Vec<VertexAttrib>,
    pub used_uniforms: Vec<ShaderUniform>,
    pub used_uniform_textures: Vec<ShaderUniform>,
    pub used_uniform_buffers: Vec<ShaderUniform>,
    pub used_readonly_buffers: Vec<ShaderUniform>,
    pub used_readonly_images: Vec<ShaderUniform>,
    pub work_group_size: [u32; 3],
}
